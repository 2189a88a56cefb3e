//! Core domain model for the property feed sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod area;
pub mod diff;
pub mod feed;

pub use area::{resolve_area, DEFAULT_AREA_ID};
pub use diff::{diff_listing, FieldValue, ListingPatch};
pub use feed::{find_assigned_agent, parse_count, FeedAgent, FeedListing};

pub const CRATE_NAME: &str = "pfsync-core";

/// Role stamped on every agent this pipeline creates.
pub const AGENT_ROLE: &str = "agent";
/// Language code of the only translation row the pipeline produces.
pub const ENGLISH: &str = "en";
/// Every stored media reference starts with this prefix.
pub const MEDIA_PREFIX: &str = "property_images";

pub const DEFAULT_STATUS_TYPE: &str = "all";
pub const DEFAULT_CONSTRUCTION_TYPE: &str = "apartment";

/// Agent as produced from the feed, before it has a store identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDraft {
    pub email: String,
    pub phone: String,
    pub avatar: String,
    pub role: String,
    pub is_active: bool,
}

/// Persisted agent (user) row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub email: String,
    pub phone: String,
    pub avatar: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Candidate listing built from a feed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub remote_id: String,
    pub agent_id: Option<i64>,
    pub area_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub bathrooms: i32,
    pub bedrooms: i32,
    pub floor_area: f64,
    pub price: i64,
    pub status_type: String,
    pub construction_type: String,
    pub slug: String,
    pub is_visible: bool,
}

/// Persisted listing (property) row, unique by `remote_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub remote_id: String,
    pub agent_id: Option<i64>,
    pub area_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub bathrooms: i32,
    pub bedrooms: i32,
    pub floor_area: f64,
    pub price: i64,
    pub status_type: String,
    pub construction_type: String,
    pub slug: String,
    pub is_visible: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Localized text for a listing, unique by `(listing_id, language_code)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub listing_id: i64,
    pub language_code: String,
    pub title: String,
    pub address: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: i64,
    pub listing_id: i64,
    /// Path relative to the media root, always under [`MEDIA_PREFIX`].
    pub path: String,
}

/// A stored media reference whose file is gone. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingMediaRecord {
    pub asset_id: i64,
    pub listing_id: i64,
    pub remote_id: String,
    pub path: String,
}

/// Only locally hosted avatars are kept; absolute URLs are stored as empty.
pub fn normalize_avatar(avatar: &str) -> String {
    if avatar.starts_with("http://") || avatar.starts_with("https://") {
        String::new()
    } else {
        avatar.to_string()
    }
}

/// URL-safe slug for a remote listing id.
pub fn slug_for(remote_id: &str) -> String {
    remote_id
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

impl AgentDraft {
    pub fn into_agent(self, id: i64, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Agent {
        Agent {
            id,
            email: self.email,
            phone: self.phone,
            avatar: normalize_avatar(&self.avatar),
            role: self.role,
            is_active: self.is_active,
            created_at,
            updated_at,
        }
    }
}

impl ListingDraft {
    pub fn into_listing(self, id: i64, now: DateTime<Utc>) -> Listing {
        Listing {
            id,
            remote_id: self.remote_id,
            agent_id: self.agent_id,
            area_id: self.area_id,
            latitude: self.latitude,
            longitude: self.longitude,
            bathrooms: self.bathrooms,
            bedrooms: self.bedrooms,
            floor_area: self.floor_area,
            price: self.price,
            status_type: self.status_type,
            construction_type: self.construction_type,
            slug: self.slug,
            is_visible: self.is_visible,
            created_at: now,
            updated_at: now,
        }
    }
}
