//! End-to-end passes against a scripted catalog and webhook.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use badgewatch_catalog::{BackoffClient, CatalogClient};
use badgewatch_common::testing::{Method, ScriptedTransport, json_ok, status};
use badgewatch_engine::{ChangeDetector, FirstSightPolicy, SnapshotStore};
use badgewatch_notifier::WebhookDispatcher;
use badgewatch_poller::BadgePoller;

const WEBHOOK: &str = "http://discord.test/api/webhooks/primary";

fn listing(ids: &[u64]) -> serde_json::Value {
    json!({
        "previousPageCursor": null,
        "nextPageCursor": null,
        "data": ids.iter().map(|id| json!({
            "id": id,
            "name": format!("Badge {id}"),
            "description": "desc",
            "created": "2024-05-01T10:00:00.000Z",
            "awardingUniverse": { "id": 111, "name": "Game", "rootPlaceId": 0 }
        })).collect::<Vec<_>>()
    })
}

fn transport() -> Arc<ScriptedTransport> {
    Arc::new(
        ScriptedTransport::new()
            .on_get("/v1/universes/111/badges", vec![json_ok(listing(&[1, 2, 3]))])
            .on_get("/v1/universes/222/badges", vec![status(500)])
            .on_get(
                "/v1/badges/icons",
                vec![json_ok(json!({ "data": [{ "imageUrl": "https://img.test/icon.png" }] }))],
            )
            .on_post("/api/webhooks/primary", vec![status(204)]),
    )
}

fn poller(transport: Arc<ScriptedTransport>, dir: &Path, policy: FirstSightPolicy) -> BadgePoller {
    let catalog = CatalogClient::new(
        BackoffClient::new(transport.clone()),
        "http://catalog.test",
        "http://thumbs.test",
    );
    let dispatcher = Arc::new(WebhookDispatcher::new(transport, WEBHOOK));
    BadgePoller::new(
        catalog,
        dispatcher,
        SnapshotStore::new(dir.join("badges.json")),
        dir.join("games.txt"),
    )
    .with_detector(ChangeDetector::new(policy))
    .with_max_concurrent(4)
}

#[tokio::test(start_paused = true)]
async fn test_new_universe_notifies_once_then_stays_quiet() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("games.txt"), "111\n").unwrap();
    let transport = transport();
    let poller = poller(transport.clone(), dir.path(), FirstSightPolicy::Notify);

    let first = poller.run_once().await.unwrap();
    assert_eq!(first.universes, 1);
    assert_eq!(first.new_badges, 3);
    assert_eq!(first.batches_delivered, 1);

    let posted = transport.posted("/api/webhooks/primary");
    assert_eq!(posted.len(), 1);
    let embeds = posted[0]["embeds"].as_array().unwrap();
    assert_eq!(embeds.len(), 3);
    assert_eq!(embeds[0]["thumbnail"]["url"], "https://img.test/icon.png");

    let saved = SnapshotStore::new(dir.path().join("badges.json")).load().await;
    assert_eq!(saved.get("111").unwrap().data.len(), 3);

    let second = poller.run_once().await.unwrap();
    assert_eq!(second.new_badges, 0);
    assert_eq!(second.batches_delivered, 0);
    assert_eq!(transport.count(Method::Post, "/api/webhooks/primary"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_universe_does_not_abort_pass() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("games.txt"), "222\n111\n").unwrap();
    let transport = transport();
    let poller = poller(transport.clone(), dir.path(), FirstSightPolicy::Notify);

    let summary = poller.run_once().await.unwrap();
    assert_eq!(summary.universes, 2);
    assert_eq!(summary.incomplete_fetches, 1);
    assert_eq!(summary.failed_tasks, 0);
    assert_eq!(summary.new_badges, 3);
    assert_eq!(transport.count(Method::Get, "/v1/universes/222/badges"), 5);

    let saved = SnapshotStore::new(dir.path().join("badges.json")).load().await;
    assert!(saved.contains("111"));
    assert!(!saved.contains("222"));
}

#[tokio::test(start_paused = true)]
async fn test_seed_policy_records_without_notifying() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("games.txt"), "111\n").unwrap();
    let transport = transport();
    let poller = poller(transport.clone(), dir.path(), FirstSightPolicy::Seed);

    let summary = poller.run_once().await.unwrap();
    assert_eq!(summary.new_badges, 0);
    assert_eq!(transport.count(Method::Post, "/api/webhooks/primary"), 0);

    let saved = SnapshotStore::new(dir.path().join("badges.json")).load().await;
    assert_eq!(saved.get("111").unwrap().data.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_missing_universe_list_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let poller = poller(transport(), dir.path(), FirstSightPolicy::Notify);
    assert!(poller.run_once().await.is_err());
}
