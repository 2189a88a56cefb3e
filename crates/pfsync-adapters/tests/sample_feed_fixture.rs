use pfsync_adapters::{fetch_all_listings, load_fixture_feed, ListingFeed};
use pfsync_core::{find_assigned_agent, resolve_area};

fn fixture_path() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/sample-feed.json")
}

#[tokio::test]
async fn sample_feed_normalizes_into_drafts() {
    let feed = load_fixture_feed(fixture_path()).expect("fixture loads");
    let token = feed.access_token().await.expect("token");
    let roster = feed.fetch_agents(&token).await.expect("roster");
    let listings = fetch_all_listings(&feed, &token, 1).await.expect("listings");
    assert_eq!(roster.len(), 2);
    assert_eq!(listings.len(), 2);

    let agent = find_assigned_agent(&roster, listings[0].assigned_to.id).expect("agent 42");
    let draft = agent.to_draft();
    assert_eq!(draft.email, "agent@example.com");
    assert_eq!(draft.phone, "+998901234567");
    assert!(draft.is_active);

    let l1 = listings[0].to_draft(Some(1), resolve_area(listings[0].location.id));
    assert_eq!(l1.slug, "l1");
    assert_eq!(l1.bedrooms, 2);
    assert_eq!(l1.area_id, 1);
    assert_eq!(l1.price, 500_000);
    assert_eq!(l1.construction_type, "furnished");
    assert_eq!(listings[0].image_urls().len(), 2);

    let l2 = listings[1].to_draft(Some(1), resolve_area(listings[1].location.id));
    assert_eq!(l2.bedrooms, 0);
    assert_eq!(l2.bathrooms, 0);
    assert_eq!(l2.area_id, 3);
    assert_eq!(l2.status_type, "all");
    assert_eq!(l2.construction_type, "apartment");
    assert_eq!(listings[1].image_urls(), vec![""]);
}
