//! Read-only detection of media rows whose files are gone.

use std::collections::BTreeMap;

use pfsync_core::MissingMediaRecord;
use pfsync_storage::MediaRoot;
use tracing::debug;

use crate::store::{ListingStore, StoreResult};

/// Every stored media reference whose file is absent under `root`.
///
/// Rows whose owning listing no longer exists are skipped. Nothing is written.
pub async fn scan_missing(
    store: &dyn ListingStore,
    root: &MediaRoot,
) -> StoreResult<Vec<MissingMediaRecord>> {
    let mut missing = Vec::new();
    for asset in store.all_media_assets().await? {
        if root.exists(&asset.path).await {
            continue;
        }
        let Some(listing) = store.find_listing(asset.listing_id).await? else {
            debug!(asset_id = asset.id, listing_id = asset.listing_id, "orphan media row");
            continue;
        };
        missing.push(MissingMediaRecord {
            asset_id: asset.id,
            listing_id: asset.listing_id,
            remote_id: listing.remote_id,
            path: asset.path,
        });
    }
    Ok(missing)
}

/// Records keyed by remote listing id, each group in scan order.
pub fn group_by_listing(
    records: Vec<MissingMediaRecord>,
) -> BTreeMap<String, Vec<MissingMediaRecord>> {
    let mut grouped: BTreeMap<String, Vec<MissingMediaRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.remote_id.clone()).or_default().push(record);
    }
    grouped
}

/// Remove one media row. Never called by the scan itself.
pub async fn delete_media_asset(store: &dyn ListingStore, asset_id: i64) -> StoreResult<()> {
    store.delete_media_asset(asset_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use pfsync_core::ListingDraft;

    fn draft(remote_id: &str) -> ListingDraft {
        ListingDraft {
            remote_id: remote_id.into(),
            agent_id: None,
            area_id: 1,
            latitude: None,
            longitude: None,
            bathrooms: 1,
            bedrooms: 1,
            floor_area: 50.0,
            price: 100,
            status_type: "all".into(),
            construction_type: "apartment".into(),
            slug: pfsync_core::slug_for(remote_id),
            is_visible: true,
        }
    }

    #[tokio::test]
    async fn reports_missing_files_without_touching_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = MediaRoot::new(dir.path());
        std::fs::create_dir_all(dir.path().join("property_images")).expect("mkdir");
        std::fs::write(dir.path().join("property_images/present.jpg"), b"x").expect("write");

        let store = MemoryStore::new();
        let b = store.insert_listing(&draft("B"), Utc::now()).await.expect("listing");
        let a = store.insert_listing(&draft("A"), Utc::now()).await.expect("listing");
        store
            .insert_media_asset(b.id, "property_images/present.jpg")
            .await
            .expect("asset");
        let gone_b = store
            .insert_media_asset(b.id, "property_images/gone-b.jpg")
            .await
            .expect("asset");
        store
            .insert_media_asset(a.id, "property_images/gone-a.jpg")
            .await
            .expect("asset");
        // Owner was never stored.
        store
            .insert_media_asset(9_999, "property_images/orphan.jpg")
            .await
            .expect("asset");
        let before = store.media_assets().await;

        let missing = scan_missing(&store, &root).await.expect("scan");
        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].asset_id, gone_b.id);
        assert_eq!(missing[0].remote_id, "B");

        let grouped = group_by_listing(missing);
        assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(grouped["A"][0].path, "property_images/gone-a.jpg");

        assert_eq!(store.media_assets().await, before);
    }

    #[tokio::test]
    async fn delete_removes_only_the_named_row() {
        let store = MemoryStore::new();
        let keep = store.insert_media_asset(1, "property_images/a.jpg").await.expect("a");
        let removed = store.insert_media_asset(1, "property_images/b.jpg").await.expect("b");

        delete_media_asset(&store, removed.id).await.expect("delete");

        assert_eq!(store.media_assets().await, vec![keep]);
    }
}
