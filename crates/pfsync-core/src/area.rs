//! Remote location id to local area id lookup.

pub const DEFAULT_AREA_ID: i64 = 1;

const AREA_TABLE: &[(u64, i64)] = &[(3782, 1), (1001, 2), (1002, 3)];

/// Total lookup: unknown locations land in [`DEFAULT_AREA_ID`].
pub fn resolve_area(remote_location_id: u64) -> i64 {
    AREA_TABLE
        .iter()
        .find(|(remote, _)| *remote == remote_location_id)
        .map(|(_, local)| *local)
        .unwrap_or(DEFAULT_AREA_ID)
}
