//! Idempotent create-or-update for agents, listings, translations and media rows.
//!
//! Every operation looks the entity up by its natural key and branches into a
//! create or an update. The find-then-write sequence is not transactional, so
//! only one writer may run against a store at a time.

use chrono::Utc;
use pfsync_core::{
    diff_listing, normalize_avatar, Agent, AgentDraft, Listing, ListingDraft, MediaAsset,
    Translation, ENGLISH, MEDIA_PREFIX,
};
use tracing::debug;

use crate::store::{ListingStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct AgentUpsert {
    pub agent: Agent,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct ListingUpsert {
    pub listing: Listing,
    pub created: bool,
    /// True on creation, or when any diffed field changed or visibility was restored.
    pub changed: bool,
    pub changed_fields: Vec<String>,
}

/// Match on email; an existing row keeps its id and `created_at`, everything
/// else is overwritten.
pub async fn upsert_agent(
    store: &dyn ListingStore,
    mut candidate: AgentDraft,
) -> StoreResult<AgentUpsert> {
    candidate.avatar = normalize_avatar(&candidate.avatar);
    let now = Utc::now();

    match store.find_agent_by_email(&candidate.email).await? {
        Some(existing) => {
            let agent = candidate.into_agent(existing.id, existing.created_at, now);
            store.save_agent(&agent).await?;
            debug!(agent_id = agent.id, "agent updated");
            Ok(AgentUpsert {
                agent,
                created: false,
            })
        }
        None => {
            let agent = store.insert_agent(&candidate, now).await?;
            debug!(agent_id = agent.id, "agent created");
            Ok(AgentUpsert {
                agent,
                created: true,
            })
        }
    }
}

/// Match on remote id; existing rows only receive the fields that differ.
/// The English translation is written either way.
pub async fn upsert_listing(
    store: &dyn ListingStore,
    candidate: ListingDraft,
    title_en: &str,
    description_en: &str,
) -> StoreResult<ListingUpsert> {
    let now = Utc::now();

    let result = match store.find_listing_by_remote_id(&candidate.remote_id).await? {
        None => {
            let listing = store.insert_listing(&candidate, now).await?;
            ListingUpsert {
                listing,
                created: true,
                changed: true,
                changed_fields: Vec::new(),
            }
        }
        Some(mut existing) => {
            let patch = diff_listing(&existing, &candidate);
            let changed = !patch.is_empty();
            if changed {
                store.update_listing_fields(existing.id, &patch, now).await?;
                patch.apply(&mut existing);
                existing.updated_at = now;
            }
            ListingUpsert {
                changed_fields: patch.columns().into_iter().map(String::from).collect(),
                listing: existing,
                created: false,
                changed,
            }
        }
    };

    store
        .upsert_translation(&Translation {
            listing_id: result.listing.id,
            language_code: ENGLISH.to_string(),
            title: title_en.to_string(),
            address: None,
            description: description_en.to_string(),
        })
        .await?;

    Ok(result)
}

/// Relative, under `property_images/`, and free of parent-directory hops.
pub fn is_valid_media_path(path: &str) -> bool {
    let prefix = format!("{MEDIA_PREFIX}/");
    path.starts_with(&prefix)
        && path.len() > prefix.len()
        && !path.split('/').any(|segment| segment == "..")
}

/// Unconditional insert; callers decide whether to check for an existing
/// `(listing, path)` row first.
pub async fn upsert_media_asset(
    store: &dyn ListingStore,
    listing_id: i64,
    path: &str,
) -> StoreResult<MediaAsset> {
    if !is_valid_media_path(path) {
        return Err(StoreError::InvalidMediaPath(path.to_string()));
    }
    store.insert_media_asset(listing_id, path).await
}

/// Point an existing media row at freshly fetched content.
pub async fn repoint_media_asset(
    store: &dyn ListingStore,
    asset_id: i64,
    path: &str,
) -> StoreResult<()> {
    if !is_valid_media_path(path) {
        return Err(StoreError::InvalidMediaPath(path.to_string()));
    }
    store.update_media_asset_path(asset_id, path).await
}
