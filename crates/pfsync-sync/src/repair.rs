//! Self-healing of media rows whose files went missing.

use std::collections::HashMap;

use anyhow::{Context, Result};
use pfsync_adapters::{fetch_all_listings, ListingFeed};
use pfsync_core::{FeedListing, MediaAsset, MissingMediaRecord};
use pfsync_storage::{expected_media_path, MediaFetcher};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::scan::{group_by_listing, scan_missing};
use crate::store::{ListingStore, StoreResult};
use crate::upsert::repoint_media_asset;

/// Page ceiling for a standalone repair run.
pub const REPAIR_MAX_PAGES: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    pub missing: usize,
    pub repaired: usize,
    pub failed: usize,
}

/// Result of downloading one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Fetched {
    Stored(String),
    /// The download reported success but the file is not under the media root.
    Unverified,
    Failed,
}

impl Fetched {
    /// Only a failed download counts against the pass.
    pub(crate) fn is_failure(&self) -> bool {
        matches!(self, Fetched::Failed)
    }
}

/// Point `asset` at a freshly fetched copy of one of `urls`.
///
/// A URL that maps onto the row's own file name is tried first, then the rest
/// in feed order. A fetched path already held by another row of the same
/// listing is passed over. Returns the new relative path, or `None` when no
/// URL produced a usable file. Fetch failures are logged; only store failures
/// are returned.
pub async fn repair_asset_from_urls(
    store: &dyn ListingStore,
    fetcher: &MediaFetcher,
    asset: &MediaAsset,
    urls: &[&str],
) -> StoreResult<Option<String>> {
    let mut order: Vec<usize> = (0..urls.len()).filter(|&i| !urls[i].is_empty()).collect();
    order.sort_by_key(|&i| {
        expected_media_path(urls[i], asset.listing_id, i).as_deref() != Some(asset.path.as_str())
    });

    for idx in order {
        let Fetched::Stored(path) = fetch_verified(fetcher, urls[idx], asset.listing_id, idx).await
        else {
            continue;
        };
        if held_by_other_row(store, asset, &path).await? {
            debug!(asset_id = asset.id, %path, "path belongs to another row; trying next url");
            continue;
        }
        repoint_media_asset(store, asset.id, &path).await?;
        info!(asset_id = asset.id, old = %asset.path, new = %path, "media row repaired");
        return Ok(Some(path));
    }
    Ok(None)
}

async fn held_by_other_row(
    store: &dyn ListingStore,
    asset: &MediaAsset,
    path: &str,
) -> StoreResult<bool> {
    Ok(store
        .find_media_asset(asset.listing_id, path)
        .await?
        .is_some_and(|other| other.id != asset.id))
}

/// Fetch and confirm the file is present under the media root.
pub(crate) async fn fetch_verified(
    fetcher: &MediaFetcher,
    url: &str,
    owner_id: i64,
    sequence_index: usize,
) -> Fetched {
    match fetcher.fetch(url, owner_id, sequence_index).await {
        Ok(path) if fetcher.root().exists(&path).await => Fetched::Stored(path),
        Ok(path) => {
            warn!(%url, %path, "fetched media not found on disk");
            Fetched::Unverified
        }
        Err(err) => {
            warn!(%url, error = %err, "media fetch failed");
            Fetched::Failed
        }
    }
}

/// Rebuild every missing media file from the current feed.
///
/// The feed is only contacted when the scan finds something to repair.
pub async fn run_repair(
    store: &dyn ListingStore,
    fetcher: &MediaFetcher,
    feed: &dyn ListingFeed,
) -> Result<RepairSummary> {
    let missing = scan_missing(store, fetcher.root())
        .await
        .context("scanning media rows")?;
    let mut summary = RepairSummary {
        missing: missing.len(),
        ..Default::default()
    };
    if missing.is_empty() {
        info!("no missing media; nothing to repair");
        return Ok(summary);
    }
    info!(missing = summary.missing, "repairing missing media");

    let token = feed.access_token().await.context("acquiring feed token")?;
    let listings = fetch_all_listings(feed, &token, REPAIR_MAX_PAGES)
        .await
        .context("fetching listings")?;
    let by_remote_id: HashMap<&str, &FeedListing> =
        listings.iter().map(|l| (l.id.as_str(), l)).collect();

    for (remote_id, records) in group_by_listing(missing) {
        let urls: Vec<&str> = by_remote_id
            .get(remote_id.as_str())
            .map(|l| l.image_urls().into_iter().filter(|u| !u.is_empty()).collect())
            .unwrap_or_default();
        if urls.is_empty() {
            warn!(%remote_id, records = records.len(), "listing has no feed images; cannot repair");
            summary.failed += records.len();
            continue;
        }
        for (idx, record) in records.iter().enumerate() {
            if repair_record(store, fetcher, record, &urls, idx).await {
                summary.repaired += 1;
            } else {
                summary.failed += 1;
            }
        }
    }

    info!(
        repaired = summary.repaired,
        failed = summary.failed,
        "media repair finished"
    );
    Ok(summary)
}

async fn repair_record(
    store: &dyn ListingStore,
    fetcher: &MediaFetcher,
    record: &MissingMediaRecord,
    urls: &[&str],
    idx: usize,
) -> bool {
    let url = urls.get(idx).unwrap_or(&urls[0]);
    let Fetched::Stored(path) = fetch_verified(fetcher, url, record.listing_id, idx).await else {
        return false;
    };
    let asset = MediaAsset {
        id: record.asset_id,
        listing_id: record.listing_id,
        path: record.path.clone(),
    };
    match held_by_other_row(store, &asset, &path).await {
        Ok(false) => {}
        Ok(true) => {
            warn!(asset_id = record.asset_id, %path, "fetched path belongs to another row");
            return false;
        }
        Err(err) => {
            warn!(asset_id = record.asset_id, error = %err, "failed to look up media row");
            return false;
        }
    }
    match repoint_media_asset(store, record.asset_id, &path).await {
        Ok(()) => {
            info!(asset_id = record.asset_id, %path, "media row repaired");
            true
        }
        Err(err) => {
            warn!(asset_id = record.asset_id, error = %err, "failed to update media row");
            false
        }
    }
}
