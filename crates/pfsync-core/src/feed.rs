//! Wire shapes of the upstream listing feed and their normalization into drafts.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    slug_for, AgentDraft, ListingDraft, AGENT_ROLE, DEFAULT_CONSTRUCTION_TYPE, DEFAULT_STATUS_TYPE,
};

/// Bedroom/bathroom counts arrive as numbers, numeric strings, `"studio"` or empty.
pub fn parse_count(raw: &str) -> i32 {
    raw.trim().parse::<i32>().map(|v| v.max(0)).unwrap_or(0)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCount {
    Integer(i64),
    Real(f64),
    Text(String),
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawCount>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawCount::Integer(v)) => v.clamp(0, i32::MAX as i64) as i32,
        Some(RawCount::Real(v)) if v.is_finite() && v > 0.0 => v.min(i32::MAX as f64) as i32,
        Some(RawCount::Real(_)) => 0,
        Some(RawCount::Text(s)) => parse_count(&s),
        None => 0,
    })
}

/// Explicit `null` decodes like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    #[serde(default, deserialize_with = "null_as_default")]
    pub en: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRef {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRef {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceAmounts {
    #[serde(default, deserialize_with = "null_as_default")]
    pub sale: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    #[serde(default, deserialize_with = "null_as_default")]
    pub amounts: PriceAmounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedImage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub original: ImageUrl,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMedia {
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<FeedImage>,
}

/// One record of the paginated listings feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedListing {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: LocalizedText,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: LocalizedText,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub furnishing_type: String,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub bathrooms: i32,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub bedrooms: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub size: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: LocationRef,
    #[serde(default, deserialize_with = "null_as_default")]
    pub assigned_to: IdRef,
    #[serde(default, deserialize_with = "null_as_default")]
    pub price: Price,
    #[serde(default, deserialize_with = "null_as_default")]
    pub media: FeedMedia,
    #[serde(default)]
    pub reference: Option<String>,
}

impl FeedListing {
    /// Declared original-resolution image URLs, in feed order, empty entries included.
    pub fn image_urls(&self) -> Vec<&str> {
        self.media
            .images
            .iter()
            .map(|img| img.original.url.as_str())
            .collect()
    }

    pub fn to_draft(&self, agent_id: Option<i64>, area_id: i64) -> ListingDraft {
        let status_type = non_empty_or(&self.category, DEFAULT_STATUS_TYPE);
        let construction_type = non_empty_or(&self.furnishing_type, DEFAULT_CONSTRUCTION_TYPE);

        ListingDraft {
            remote_id: self.id.clone(),
            agent_id,
            area_id,
            latitude: None,
            longitude: None,
            bathrooms: self.bathrooms,
            bedrooms: self.bedrooms,
            floor_area: self.size,
            price: self.price.amounts.sale,
            status_type,
            construction_type,
            slug: slug_for(&self.id),
            is_visible: true,
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVariant {
    #[serde(default, deserialize_with = "null_as_default")]
    pub default: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVariants {
    #[serde(default, deserialize_with = "null_as_default")]
    pub large: ImageVariant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub phone: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub image_variants: ImageVariants,
}

/// One record of the agent roster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedAgent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mobile: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default)]
    pub public_profile: Option<PublicProfile>,
}

impl FeedAgent {
    pub fn public_profile_id(&self) -> Option<i64> {
        self.public_profile.as_ref().map(|p| p.id)
    }

    pub fn to_draft(&self) -> AgentDraft {
        let mut phone = self.mobile.clone();
        let mut avatar = String::new();

        if let Some(profile) = &self.public_profile {
            if !profile.phone.is_empty() {
                phone = profile.phone.clone();
            }
            avatar = profile.image_variants.large.default.clone();
        }

        AgentDraft {
            email: self.email.trim().to_string(),
            phone,
            avatar,
            role: AGENT_ROLE.to_string(),
            is_active: self.status == "active",
        }
    }
}

/// First roster entry whose public profile id matches the listing's assignee.
pub fn find_assigned_agent(roster: &[FeedAgent], profile_id: i64) -> Option<&FeedAgent> {
    roster
        .iter()
        .find(|agent| agent.public_profile_id() == Some(profile_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_normalize_studio_empty_and_garbage_to_zero() {
        assert_eq!(parse_count("studio"), 0);
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("3"), 3);
        assert_eq!(parse_count(" 4 "), 4);
        assert_eq!(parse_count("-2"), 0);
        assert_eq!(parse_count("7+"), 0);
    }

    #[test]
    fn listing_deserializes_mixed_count_shapes() {
        let listing: FeedListing = serde_json::from_value(serde_json::json!({
            "id": "L1",
            "title": {"en": "Flat"},
            "bedrooms": "studio",
            "bathrooms": 2,
            "size": 54.5,
            "location": {"id": 1001},
            "assignedTo": {"id": 42},
            "price": {"amounts": {"sale": 500000}},
            "media": {"images": [{"original": {"url": "https://img/a.jpg"}}]}
        }))
        .expect("listing json");

        assert_eq!(listing.bedrooms, 0);
        assert_eq!(listing.bathrooms, 2);
        assert_eq!(listing.assigned_to.id, 42);
        assert_eq!(listing.image_urls(), vec!["https://img/a.jpg"]);

        let listing: FeedListing = serde_json::from_value(serde_json::json!({
            "id": "L2",
            "bedrooms": "3",
            "bathrooms": null
        }))
        .expect("sparse listing json");
        assert_eq!(listing.bedrooms, 3);
        assert_eq!(listing.bathrooms, 0);
        assert!(listing.image_urls().is_empty());
    }

    #[test]
    fn explicit_nulls_decode_as_zero_values() {
        let page: Vec<FeedListing> = serde_json::from_value(serde_json::json!([
            {"id": "OK1", "assignedTo": {"id": 42}},
            {
                "id": "L2",
                "title": null,
                "category": null,
                "furnishingType": null,
                "size": null,
                "location": null,
                "assignedTo": null,
                "price": {"amounts": null},
                "media": {"images": [{"original": null}, {"original": {"url": null}}]}
            }
        ]))
        .expect("page with nulls");

        assert_eq!(page.len(), 2);
        assert_eq!(page[0].assigned_to.id, 42);
        let sparse = &page[1];
        assert_eq!(sparse.assigned_to.id, 0);
        assert_eq!(sparse.location.id, 0);
        assert_eq!(sparse.size, 0.0);
        assert_eq!(sparse.price.amounts.sale, 0);
        assert_eq!(sparse.image_urls(), vec!["", ""]);
        let draft = sparse.to_draft(None, 1);
        assert_eq!(draft.status_type, "all");
        assert_eq!(draft.construction_type, "apartment");

        let agent: FeedAgent = serde_json::from_value(serde_json::json!({
            "id": 9,
            "email": "n@example.com",
            "mobile": null,
            "status": null,
            "publicProfile": {"id": 42, "phone": null, "imageVariants": {"large": null}}
        }))
        .expect("agent with nulls");
        let draft = agent.to_draft();
        assert_eq!(draft.phone, "");
        assert_eq!(draft.avatar, "");
        assert!(!draft.is_active);
        assert_eq!(agent.public_profile_id(), Some(42));
    }

    #[test]
    fn draft_applies_category_fallbacks_and_slug() {
        let listing = FeedListing {
            id: "AbC-9".into(),
            ..Default::default()
        };
        let draft = listing.to_draft(Some(7), 2);
        assert_eq!(draft.status_type, "all");
        assert_eq!(draft.construction_type, "apartment");
        assert_eq!(draft.slug, "abc-9");
        assert_eq!(draft.agent_id, Some(7));
        assert!(draft.is_visible);

        let listing = FeedListing {
            id: "X".into(),
            category: "sale".into(),
            furnishing_type: "furnished".into(),
            ..Default::default()
        };
        let draft = listing.to_draft(None, 1);
        assert_eq!(draft.status_type, "sale");
        assert_eq!(draft.construction_type, "furnished");
    }

    #[test]
    fn agent_draft_prefers_profile_phone_and_keeps_raw_avatar() {
        let agent: FeedAgent = serde_json::from_value(serde_json::json!({
            "id": 1,
            "email": " agent@example.com ",
            "mobile": "+100",
            "status": "active",
            "publicProfile": {
                "id": 42,
                "phone": "+200",
                "imageVariants": {"large": {"default": "https://cdn/a.png"}}
            }
        }))
        .expect("agent json");

        let draft = agent.to_draft();
        assert_eq!(draft.email, "agent@example.com");
        assert_eq!(draft.phone, "+200");
        assert_eq!(draft.avatar, "https://cdn/a.png");
        assert_eq!(draft.role, "agent");
        assert!(draft.is_active);

        let bare = FeedAgent {
            email: "b@example.com".into(),
            mobile: "+300".into(),
            status: "inactive".into(),
            ..Default::default()
        };
        let draft = bare.to_draft();
        assert_eq!(draft.phone, "+300");
        assert!(!draft.is_active);
    }

    #[test]
    fn assigned_agent_matches_on_public_profile_id() {
        let roster = vec![
            FeedAgent {
                id: 42,
                email: "no-profile@example.com".into(),
                ..Default::default()
            },
            FeedAgent {
                id: 1,
                email: "match@example.com".into(),
                public_profile: Some(PublicProfile {
                    id: 42,
                    ..Default::default()
                }),
                ..Default::default()
            },
        ];
        let found = find_assigned_agent(&roster, 42).expect("agent");
        assert_eq!(found.email, "match@example.com");
        assert!(find_assigned_agent(&roster, 7).is_none());
    }
}
