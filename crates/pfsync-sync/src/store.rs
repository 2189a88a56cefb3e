//! Relational store contract plus an in-memory implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pfsync_core::{
    Agent, AgentDraft, Listing, ListingDraft, ListingPatch, MediaAsset, Translation,
};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} with key {key} already exists")]
    Conflict { entity: &'static str, key: String },
    #[error("media path {0:?} must be relative and start with property_images/")]
    InvalidMediaPath(String),
    #[error("column {0} cannot be patched")]
    UnknownColumn(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence primitives the upsert layer, scanner and orchestrator build on.
///
/// Lookups by natural key return `Ok(None)` on a miss. Writes are committed
/// individually; nothing here spans a transaction.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn find_agent_by_email(&self, email: &str) -> StoreResult<Option<Agent>>;
    async fn insert_agent(&self, draft: &AgentDraft, now: DateTime<Utc>) -> StoreResult<Agent>;
    /// Overwrite every mutable column of an existing agent row.
    async fn save_agent(&self, agent: &Agent) -> StoreResult<()>;

    async fn find_listing(&self, id: i64) -> StoreResult<Option<Listing>>;
    async fn find_listing_by_remote_id(&self, remote_id: &str) -> StoreResult<Option<Listing>>;
    async fn insert_listing(&self, draft: &ListingDraft, now: DateTime<Utc>) -> StoreResult<Listing>;
    /// Write only the patched columns (plus `updated_at`).
    async fn update_listing_fields(
        &self,
        id: i64,
        patch: &ListingPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Insert, or overwrite title/address/description on `(listing_id, language_code)`.
    async fn upsert_translation(&self, translation: &Translation) -> StoreResult<()>;
    async fn find_translation(
        &self,
        listing_id: i64,
        language_code: &str,
    ) -> StoreResult<Option<Translation>>;

    async fn insert_media_asset(&self, listing_id: i64, path: &str) -> StoreResult<MediaAsset>;
    async fn update_media_asset_path(&self, id: i64, path: &str) -> StoreResult<()>;
    async fn delete_media_asset(&self, id: i64) -> StoreResult<()>;
    async fn find_media_asset(&self, listing_id: i64, path: &str) -> StoreResult<Option<MediaAsset>>;
    async fn media_assets_for_listing(&self, listing_id: i64) -> StoreResult<Vec<MediaAsset>>;
    async fn all_media_assets(&self) -> StoreResult<Vec<MediaAsset>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    agents: BTreeMap<i64, Agent>,
    listings: BTreeMap<i64, Listing>,
    translations: BTreeMap<(i64, String), Translation>,
    media: BTreeMap<i64, MediaAsset>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Store kept entirely in process memory; used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn agents(&self) -> Vec<Agent> {
        self.state.lock().await.agents.values().cloned().collect()
    }

    pub async fn listings(&self) -> Vec<Listing> {
        self.state.lock().await.listings.values().cloned().collect()
    }

    pub async fn translations(&self) -> Vec<Translation> {
        self.state.lock().await.translations.values().cloned().collect()
    }

    pub async fn media_assets(&self) -> Vec<MediaAsset> {
        self.state.lock().await.media.values().cloned().collect()
    }

    /// Flip visibility outside the upsert path, as an operator would.
    pub async fn set_listing_visibility(&self, id: i64, visible: bool) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let listing = state.listings.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "listing",
            id: id.to_string(),
        })?;
        listing.is_visible = visible;
        Ok(())
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn find_agent_by_email(&self, email: &str) -> StoreResult<Option<Agent>> {
        let state = self.state.lock().await;
        Ok(state.agents.values().find(|a| a.email == email).cloned())
    }

    async fn insert_agent(&self, draft: &AgentDraft, now: DateTime<Utc>) -> StoreResult<Agent> {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let agent = draft.clone().into_agent(id, now, now);
        state.agents.insert(id, agent.clone());
        Ok(agent)
    }

    async fn save_agent(&self, agent: &Agent) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let slot = state.agents.get_mut(&agent.id).ok_or(StoreError::NotFound {
            entity: "agent",
            id: agent.id.to_string(),
        })?;
        *slot = agent.clone();
        Ok(())
    }

    async fn find_listing(&self, id: i64) -> StoreResult<Option<Listing>> {
        Ok(self.state.lock().await.listings.get(&id).cloned())
    }

    async fn find_listing_by_remote_id(&self, remote_id: &str) -> StoreResult<Option<Listing>> {
        let state = self.state.lock().await;
        Ok(state
            .listings
            .values()
            .find(|l| l.remote_id == remote_id)
            .cloned())
    }

    async fn insert_listing(&self, draft: &ListingDraft, now: DateTime<Utc>) -> StoreResult<Listing> {
        let mut state = self.state.lock().await;
        if state.listings.values().any(|l| l.remote_id == draft.remote_id) {
            return Err(StoreError::Conflict {
                entity: "listing",
                key: draft.remote_id.clone(),
            });
        }
        let id = state.allocate_id();
        let listing = draft.clone().into_listing(id, now);
        state.listings.insert(id, listing.clone());
        Ok(listing)
    }

    async fn update_listing_fields(
        &self,
        id: i64,
        patch: &ListingPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let listing = state.listings.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "listing",
            id: id.to_string(),
        })?;
        patch.apply(listing);
        listing.updated_at = now;
        Ok(())
    }

    async fn upsert_translation(&self, translation: &Translation) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.translations.insert(
            (translation.listing_id, translation.language_code.clone()),
            translation.clone(),
        );
        Ok(())
    }

    async fn find_translation(
        &self,
        listing_id: i64,
        language_code: &str,
    ) -> StoreResult<Option<Translation>> {
        let state = self.state.lock().await;
        Ok(state
            .translations
            .get(&(listing_id, language_code.to_string()))
            .cloned())
    }

    async fn insert_media_asset(&self, listing_id: i64, path: &str) -> StoreResult<MediaAsset> {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let asset = MediaAsset {
            id,
            listing_id,
            path: path.to_string(),
        };
        state.media.insert(id, asset.clone());
        Ok(asset)
    }

    async fn update_media_asset_path(&self, id: i64, path: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let asset = state.media.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "media asset",
            id: id.to_string(),
        })?;
        asset.path = path.to_string();
        Ok(())
    }

    async fn delete_media_asset(&self, id: i64) -> StoreResult<()> {
        self.state.lock().await.media.remove(&id);
        Ok(())
    }

    async fn find_media_asset(&self, listing_id: i64, path: &str) -> StoreResult<Option<MediaAsset>> {
        let state = self.state.lock().await;
        Ok(state
            .media
            .values()
            .find(|m| m.listing_id == listing_id && m.path == path)
            .cloned())
    }

    async fn media_assets_for_listing(&self, listing_id: i64) -> StoreResult<Vec<MediaAsset>> {
        let state = self.state.lock().await;
        Ok(state
            .media
            .values()
            .filter(|m| m.listing_id == listing_id)
            .cloned()
            .collect())
    }

    async fn all_media_assets(&self) -> StoreResult<Vec<MediaAsset>> {
        Ok(self.state.lock().await.media.values().cloned().collect())
    }
}
