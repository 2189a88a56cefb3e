//! Field-level change detection between a stored listing and a feed candidate.
//!
//! The compared fields live in one table of rules; each rule knows how to
//! detect a difference and which column value to write when it finds one.

use serde::{Deserialize, Serialize};

use crate::{Listing, ListingDraft};

/// Column value carried by a partial listing update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Flag(bool),
}

struct FieldRule {
    column: &'static str,
    differs: fn(&Listing, &ListingDraft) -> bool,
    value: fn(&ListingDraft) -> FieldValue,
}

const VISIBILITY_COLUMN: &str = "is_visible";

const LISTING_RULES: &[FieldRule] = &[
    FieldRule {
        column: "price",
        differs: |stored, candidate| stored.price != candidate.price,
        value: |candidate| FieldValue::Integer(candidate.price),
    },
    FieldRule {
        column: "bedrooms",
        differs: |stored, candidate| stored.bedrooms != candidate.bedrooms,
        value: |candidate| FieldValue::Integer(i64::from(candidate.bedrooms)),
    },
    FieldRule {
        column: "bathrooms",
        differs: |stored, candidate| stored.bathrooms != candidate.bathrooms,
        value: |candidate| FieldValue::Integer(i64::from(candidate.bathrooms)),
    },
    FieldRule {
        column: "square_sqft",
        differs: |stored, candidate| stored.floor_area != candidate.floor_area,
        value: |candidate| FieldValue::Real(candidate.floor_area),
    },
    FieldRule {
        column: "status_type",
        differs: |stored, candidate| stored.status_type != candidate.status_type,
        value: |candidate| FieldValue::Text(candidate.status_type.clone()),
    },
    FieldRule {
        column: "construction_type",
        differs: |stored, candidate| stored.construction_type != candidate.construction_type,
        value: |candidate| FieldValue::Text(candidate.construction_type.clone()),
    },
];

/// Minimal set of column writes that brings a stored listing in line with the feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingPatch {
    pub changes: Vec<(String, FieldValue)>,
}

impl ListingPatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn columns(&self) -> Vec<&str> {
        self.changes.iter().map(|(column, _)| column.as_str()).collect()
    }

    /// Apply the patch to an in-memory copy of the stored row.
    pub fn apply(&self, listing: &mut Listing) {
        for (column, value) in &self.changes {
            match (column.as_str(), value) {
                ("price", FieldValue::Integer(v)) => listing.price = *v,
                ("bedrooms", FieldValue::Integer(v)) => listing.bedrooms = *v as i32,
                ("bathrooms", FieldValue::Integer(v)) => listing.bathrooms = *v as i32,
                ("square_sqft", FieldValue::Real(v)) => listing.floor_area = *v,
                ("status_type", FieldValue::Text(v)) => listing.status_type = v.clone(),
                ("construction_type", FieldValue::Text(v)) => listing.construction_type = v.clone(),
                (VISIBILITY_COLUMN, FieldValue::Flag(v)) => listing.is_visible = *v,
                _ => {}
            }
        }
    }
}

/// Compare the diffed fields and force visibility back on for hidden rows.
pub fn diff_listing(stored: &Listing, candidate: &ListingDraft) -> ListingPatch {
    let mut changes: Vec<(String, FieldValue)> = LISTING_RULES
        .iter()
        .filter(|rule| (rule.differs)(stored, candidate))
        .map(|rule| (rule.column.to_string(), (rule.value)(candidate)))
        .collect();

    if !stored.is_visible {
        changes.push((VISIBILITY_COLUMN.to_string(), FieldValue::Flag(true)));
    }

    ListingPatch { changes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn draft() -> ListingDraft {
        ListingDraft {
            remote_id: "pf-123".into(),
            agent_id: Some(1),
            area_id: 1,
            latitude: None,
            longitude: None,
            bathrooms: 2,
            bedrooms: 2,
            floor_area: 1200.5,
            price: 500_000,
            status_type: "sale".into(),
            construction_type: "apartment".into(),
            slug: "pf-123".into(),
            is_visible: true,
        }
    }

    #[test]
    fn identical_rows_produce_empty_patch() {
        let stored = draft().into_listing(1, Utc::now());
        let patch = diff_listing(&stored, &draft());
        assert!(patch.is_empty());
    }

    #[test]
    fn only_differing_fields_are_collected() {
        let stored = draft().into_listing(1, Utc::now());
        let mut candidate = draft();
        candidate.price = 600_000;
        candidate.bedrooms = 3;
        candidate.slug = "ignored".into();

        let patch = diff_listing(&stored, &candidate);
        assert_eq!(patch.columns(), vec!["price", "bedrooms"]);
        assert_eq!(patch.changes[0].1, FieldValue::Integer(600_000));
    }

    #[test]
    fn hidden_rows_are_made_visible_again() {
        let mut stored = draft().into_listing(1, Utc::now());
        stored.is_visible = false;
        let patch = diff_listing(&stored, &draft());
        assert_eq!(patch.columns(), vec!["is_visible"]);

        patch.apply(&mut stored);
        assert!(stored.is_visible);
    }

    #[test]
    fn apply_writes_every_rule_column() {
        let mut stored = draft().into_listing(1, Utc::now());
        let candidate = ListingDraft {
            bathrooms: 4,
            floor_area: 80.0,
            status_type: "rent".into(),
            construction_type: "villa".into(),
            ..draft()
        };
        let patch = diff_listing(&stored, &candidate);
        assert_eq!(
            patch.columns(),
            vec!["bathrooms", "square_sqft", "status_type", "construction_type"]
        );

        patch.apply(&mut stored);
        assert_eq!(stored.bathrooms, 4);
        assert_eq!(stored.floor_area, 80.0);
        assert_eq!(stored.status_type, "rent");
        assert_eq!(stored.construction_type, "villa");
        assert!(diff_listing(&stored, &candidate).is_empty());
    }
}
