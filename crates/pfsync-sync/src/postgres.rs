//! Postgres-backed [`ListingStore`] over the site's existing tables.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pfsync_core::{
    Agent, AgentDraft, FieldValue, Listing, ListingDraft, ListingPatch, MediaAsset, Translation,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

use crate::store::{ListingStore, StoreError, StoreResult};

/// Columns a [`ListingPatch`] may touch.
const PATCHABLE_COLUMNS: &[&str] = &[
    "price",
    "bedrooms",
    "bathrooms",
    "square_sqft",
    "status_type",
    "construction_type",
    "is_visible",
];

const LISTING_COLUMNS: &str = "id, pf_id, user_id, area_id, latitude, longitude, bathrooms, \
     bedrooms, square_sqft, price, status_type, construction_type, slug, is_visible, \
     created_at, updated_at";

const AGENT_COLUMNS: &str = "id, email, phone, avatar, role, is_active, created_at, updated_at";

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(4)
        .connect(database_url)
        .await
        .context("connecting to postgres")
}

/// Apply the bundled schema migrations.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("running migrations")
}

#[derive(Debug, FromRow)]
struct AgentRow {
    id: i64,
    email: String,
    phone: Option<String>,
    avatar: Option<String>,
    role: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        Agent {
            id: row.id,
            email: row.email,
            phone: row.phone.unwrap_or_default(),
            avatar: row.avatar.unwrap_or_default(),
            role: row.role,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ListingRow {
    id: i64,
    pf_id: String,
    user_id: Option<i64>,
    area_id: i64,
    latitude: Option<f64>,
    longitude: Option<f64>,
    bathrooms: i32,
    bedrooms: i32,
    square_sqft: f64,
    price: i64,
    status_type: String,
    construction_type: String,
    slug: String,
    is_visible: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ListingRow> for Listing {
    fn from(row: ListingRow) -> Self {
        Listing {
            id: row.id,
            remote_id: row.pf_id,
            agent_id: row.user_id,
            area_id: row.area_id,
            latitude: row.latitude,
            longitude: row.longitude,
            bathrooms: row.bathrooms,
            bedrooms: row.bedrooms,
            floor_area: row.square_sqft,
            price: row.price,
            status_type: row.status_type,
            construction_type: row.construction_type,
            slug: row.slug,
            is_visible: row.is_visible,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TranslationRow {
    master_id: i64,
    language_code: String,
    title: String,
    address: Option<String>,
    description: String,
}

#[derive(Debug, FromRow)]
struct MediaRow {
    id: i64,
    property_id: i64,
    image: String,
}

impl From<MediaRow> for MediaAsset {
    fn from(row: MediaRow) -> Self {
        MediaAsset {
            id: row.id,
            listing_id: row.property_id,
            path: row.image,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgListingStore {
    pool: PgPool,
}

impl PgListingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn not_found(entity: &'static str, id: i64) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

#[async_trait]
impl ListingStore for PgListingStore {
    async fn find_agent_by_email(&self, email: &str) -> StoreResult<Option<Agent>> {
        let row = sqlx::query_as::<_, AgentRow>(&format!(
            "SELECT {AGENT_COLUMNS} FROM core_app_customuser WHERE email = $1 ORDER BY id LIMIT 1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Agent::from))
    }

    async fn insert_agent(&self, draft: &AgentDraft, now: DateTime<Utc>) -> StoreResult<Agent> {
        let row = sqlx::query_as::<_, AgentRow>(&format!(
            r#"
            INSERT INTO core_app_customuser
                (email, phone, avatar, role, password, is_active, is_staff, is_superuser, created_at, updated_at)
            VALUES ($1, $2, $3, $4, '!', $5, FALSE, FALSE, $6, $6)
            RETURNING {AGENT_COLUMNS}
            "#
        ))
        .bind(&draft.email)
        .bind(&draft.phone)
        .bind(pfsync_core::normalize_avatar(&draft.avatar))
        .bind(&draft.role)
        .bind(draft.is_active)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn save_agent(&self, agent: &Agent) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE core_app_customuser
            SET email = $2, phone = $3, avatar = $4, role = $5, is_active = $6,
                created_at = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(agent.id)
        .bind(&agent.email)
        .bind(&agent.phone)
        .bind(&agent.avatar)
        .bind(&agent.role)
        .bind(agent.is_active)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(not_found("agent", agent.id));
        }
        Ok(())
    }

    async fn find_listing(&self, id: i64) -> StoreResult<Option<Listing>> {
        let row = sqlx::query_as::<_, ListingRow>(&format!(
            "SELECT {LISTING_COLUMNS} FROM core_app_property WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Listing::from))
    }

    async fn find_listing_by_remote_id(&self, remote_id: &str) -> StoreResult<Option<Listing>> {
        let row = sqlx::query_as::<_, ListingRow>(&format!(
            "SELECT {LISTING_COLUMNS} FROM core_app_property WHERE pf_id = $1"
        ))
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Listing::from))
    }

    async fn insert_listing(&self, draft: &ListingDraft, now: DateTime<Utc>) -> StoreResult<Listing> {
        let row = sqlx::query_as::<_, ListingRow>(&format!(
            r#"
            INSERT INTO core_app_property
                (pf_id, user_id, area_id, latitude, longitude, bathrooms, bedrooms, square_sqft,
                 price, status_type, construction_type, slug, is_visible, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
            RETURNING {LISTING_COLUMNS}
            "#
        ))
        .bind(&draft.remote_id)
        .bind(draft.agent_id)
        .bind(draft.area_id)
        .bind(draft.latitude)
        .bind(draft.longitude)
        .bind(draft.bathrooms)
        .bind(draft.bedrooms)
        .bind(draft.floor_area)
        .bind(draft.price)
        .bind(&draft.status_type)
        .bind(&draft.construction_type)
        .bind(&draft.slug)
        .bind(draft.is_visible)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn update_listing_fields(
        &self,
        id: i64,
        patch: &ListingPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE core_app_property SET updated_at = ");
        qb.push_bind(now);
        for (column, value) in &patch.changes {
            if !PATCHABLE_COLUMNS.contains(&column.as_str()) {
                return Err(StoreError::UnknownColumn(column.clone()));
            }
            qb.push(", ");
            qb.push(column.as_str());
            qb.push(" = ");
            match (column.as_str(), value) {
                ("bedrooms" | "bathrooms", FieldValue::Integer(v)) => {
                    let v = i32::try_from(*v).unwrap_or(i32::MAX);
                    qb.push_bind(v);
                }
                (_, FieldValue::Integer(v)) => {
                    qb.push_bind(*v);
                }
                (_, FieldValue::Real(v)) => {
                    qb.push_bind(*v);
                }
                (_, FieldValue::Text(v)) => {
                    qb.push_bind(v.clone());
                }
                (_, FieldValue::Flag(v)) => {
                    qb.push_bind(*v);
                }
            }
        }
        qb.push(" WHERE id = ");
        qb.push_bind(id);

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(not_found("listing", id));
        }
        Ok(())
    }

    async fn upsert_translation(&self, translation: &Translation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO core_app_property_translation (master_id, language_code, title, address, description)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (master_id, language_code) DO UPDATE
            SET title = EXCLUDED.title,
                description = EXCLUDED.description,
                address = EXCLUDED.address
            "#,
        )
        .bind(translation.listing_id)
        .bind(&translation.language_code)
        .bind(&translation.title)
        .bind(&translation.address)
        .bind(&translation.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_translation(
        &self,
        listing_id: i64,
        language_code: &str,
    ) -> StoreResult<Option<Translation>> {
        let row = sqlx::query_as::<_, TranslationRow>(
            r#"
            SELECT master_id, language_code, title, address, description
            FROM core_app_property_translation
            WHERE master_id = $1 AND language_code = $2
            "#,
        )
        .bind(listing_id)
        .bind(language_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| Translation {
            listing_id: row.master_id,
            language_code: row.language_code,
            title: row.title,
            address: row.address,
            description: row.description,
        }))
    }

    async fn insert_media_asset(&self, listing_id: i64, path: &str) -> StoreResult<MediaAsset> {
        let row = sqlx::query_as::<_, MediaRow>(
            "INSERT INTO core_app_propertyimage (property_id, image) VALUES ($1, $2) \
             RETURNING id, property_id, image",
        )
        .bind(listing_id)
        .bind(path)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn update_media_asset_path(&self, id: i64, path: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE core_app_propertyimage SET image = $2 WHERE id = $1")
            .bind(id)
            .bind(path)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(not_found("media asset", id));
        }
        Ok(())
    }

    async fn delete_media_asset(&self, id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM core_app_propertyimage WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_media_asset(&self, listing_id: i64, path: &str) -> StoreResult<Option<MediaAsset>> {
        let row = sqlx::query_as::<_, MediaRow>(
            "SELECT id, property_id, image FROM core_app_propertyimage \
             WHERE property_id = $1 AND image = $2 ORDER BY id LIMIT 1",
        )
        .bind(listing_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MediaAsset::from))
    }

    async fn media_assets_for_listing(&self, listing_id: i64) -> StoreResult<Vec<MediaAsset>> {
        let rows = sqlx::query_as::<_, MediaRow>(
            "SELECT id, property_id, image FROM core_app_propertyimage WHERE property_id = $1 ORDER BY id",
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MediaAsset::from).collect())
    }

    async fn all_media_assets(&self) -> StoreResult<Vec<MediaAsset>> {
        let rows = sqlx::query_as::<_, MediaRow>(
            "SELECT id, property_id, image FROM core_app_propertyimage ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MediaAsset::from).collect())
    }
}
