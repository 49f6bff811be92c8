//! Target resolution through delegations, and target downloads.

mod common;

use std::sync::Arc;

use common::{delegations, meta_entry, metadata_url, target_entry, Repo, TestKey, TARGETS_URL};
use serde_json::json;
use tuf_client::{CountingTelemetry, Error, MemoryStore, Pin, Updater};

const TOOL: &[u8] = b"#!/bin/sh\necho tool\n";

/// Top-level targets delegating `pkg/*` to `a` (non-terminating), `b`
/// (terminating) and `c`, in that order.
fn delegated_repo(b_targets: serde_json::Value) -> Repo {
    let repo = Repo::new();
    let delegate = TestKey::new(30);
    let top = repo.publish_targets(
        1,
        json!({ "files/app.bin": target_entry(b"app") }),
        Some(delegations(
            &delegate,
            &[
                ("a", false, "pkg/*"),
                ("b", true, "pkg/*"),
                ("c", false, "pkg/*"),
            ],
        )),
    );
    let a = repo.publish_delegated("a", 1, &delegate, json!({}));
    let b = repo.publish_delegated("b", 1, &delegate, b_targets);
    let c = repo.publish_delegated("c", 1, &delegate, json!({ "pkg/tool": target_entry(b"c") }));
    let snapshot = repo.publish_snapshot(
        1,
        json!({
            "targets.json": meta_entry(1, &top),
            "a.json": meta_entry(1, &a),
            "b.json": meta_entry(1, &b),
            "c.json": meta_entry(1, &c),
        }),
    );
    repo.publish_timestamp(1, 1, &snapshot);
    repo
}

fn updater(repo: &Repo) -> Updater {
    repo.updater(Arc::new(MemoryStore::new()))
}

/// Resolution refreshes first when nothing has been published yet.
#[tokio::test]
async fn resolves_top_level_target() {
    let repo = delegated_repo(json!({}));
    let updater = updater(&repo);

    let target = updater.resolve_target("files/app.bin").await.unwrap().unwrap();

    assert_eq!(target.role, "targets");
    assert_eq!(target.length, 3);
    assert!(target.hashes.contains_key("sha256"));
    let requests = repo.fetcher.take_requests();
    assert!(!requests.iter().any(|url| url.ends_with("1.a.json")));
}

/// Delegations are visited in order and the first match wins.
#[tokio::test]
async fn resolves_through_delegations_in_order() {
    let repo = delegated_repo(json!({ "pkg/tool": target_entry(TOOL) }));
    let telemetry = CountingTelemetry::default();
    let updater = updater(&repo).with_telemetry(Arc::new(telemetry.clone()));

    let target = updater.resolve_target("pkg/tool").await.unwrap().unwrap();

    assert_eq!(target.role, "b");
    assert_eq!(target.length, TOOL.len() as u64);
    let watched = [
        metadata_url("1.a.json"),
        metadata_url("1.b.json"),
        metadata_url("1.c.json"),
    ];
    let requests = repo.fetcher.take_requests();
    let delegated: Vec<&String> = requests
        .iter()
        .filter(|url| watched.contains(*url))
        .collect();
    assert_eq!(delegated, [&watched[0], &watched[1]]);
    assert_eq!(telemetry.counters().snapshot().delegated_roles_loaded, 2);
}

/// A terminating delegation that does not list the path ends the search.
#[tokio::test]
async fn terminating_delegation_hides_later_roles() {
    let repo = delegated_repo(json!({}));
    let updater = updater(&repo);

    let err = updater.resolve_target("pkg/tool").await.unwrap_err();

    assert!(
        matches!(
            err,
            Error::DelegationNotFound { ref path, ref role } if path == "pkg/tool" && role == "b"
        ),
        "{err}"
    );
    assert_eq!(repo.fetcher.request_count(&metadata_url("1.c.json")), 0);
}

#[tokio::test]
async fn unmatched_path_is_not_found() {
    let repo = delegated_repo(json!({}));
    let updater = updater(&repo);

    assert_eq!(updater.resolve_target("docs/readme.md").await.unwrap(), None);
    assert_eq!(repo.fetcher.request_count(&metadata_url("1.a.json")), 0);
}

/// Loaded delegated roles are published and reused by later resolutions.
#[tokio::test]
async fn delegated_roles_are_loaded_once() {
    let repo = delegated_repo(json!({ "pkg/tool": target_entry(TOOL) }));
    let updater = updater(&repo);

    updater.resolve_target("pkg/tool").await.unwrap();
    updater.resolve_target("pkg/tool").await.unwrap();

    assert_eq!(repo.fetcher.request_count(&metadata_url("1.a.json")), 1);
    assert_eq!(repo.fetcher.request_count(&metadata_url("1.b.json")), 1);
    assert!(updater.trusted().unwrap().targets("b").is_some());
}

/// A delegated role signed by a key its delegator did not list is rejected.
#[tokio::test]
async fn delegated_role_needs_delegated_keys() {
    let repo = delegated_repo(json!({}));
    let forged = repo.publish_delegated("a", 1, &TestKey::new(99), json!({}));
    let top = repo.fetcher.served()[&metadata_url("1.targets.json")].clone();
    let b = repo.fetcher.served()[&metadata_url("1.b.json")].clone();
    let c = repo.fetcher.served()[&metadata_url("1.c.json")].clone();
    let snapshot = repo.publish_snapshot(
        1,
        json!({
            "targets.json": meta_entry(1, &top),
            "a.json": meta_entry(1, &forged),
            "b.json": meta_entry(1, &b),
            "c.json": meta_entry(1, &c),
        }),
    );
    repo.publish_timestamp(1, 1, &snapshot);
    let updater = updater(&repo);

    let err = updater.resolve_target("pkg/tool").await.unwrap_err();

    assert!(
        matches!(err, Error::SignatureThreshold { ref role, .. } if role == "a"),
        "{err}"
    );
}

#[tokio::test]
async fn downloads_hash_prefixed_target() {
    let repo = delegated_repo(json!({ "pkg/tool": target_entry(TOOL) }));
    repo.serve_target("pkg/tool", TOOL);
    let updater = updater(&repo);

    let target = updater.resolve_target("pkg/tool").await.unwrap().unwrap();
    let bytes = updater.download_target(&target).await.unwrap();

    assert_eq!(bytes, TOOL);
    let hash = &target.hashes["sha256"];
    assert_eq!(
        repo.fetcher.take_requests().last(),
        Some(&format!("{TARGETS_URL}/pkg/{hash}.tool"))
    );
}

/// Without hash prefixes the target is fetched by its plain path.
#[tokio::test]
async fn downloads_plain_target_path_when_prefixing_is_disabled() {
    let repo = delegated_repo(json!({}));
    repo.fetcher
        .serve(format!("{TARGETS_URL}/files/app.bin"), b"app".to_vec());
    let mut config = repo.config();
    config.prefix_targets_with_hash = false;
    let updater = Updater::new(config, repo.fetcher.clone(), Arc::new(MemoryStore::new()))
        .with_bootstrap_root(repo.bootstrap.clone())
        .with_clock(repo.clock.clone());

    let target = updater.resolve_target("files/app.bin").await.unwrap().unwrap();

    assert_eq!(updater.download_target(&target).await.unwrap(), b"app");
}

/// Content that does not match the authenticated hash is rejected.
#[tokio::test]
async fn tampered_target_is_rejected() {
    let repo = delegated_repo(json!({}));
    let updater = updater(&repo);
    let target = updater.resolve_target("files/app.bin").await.unwrap().unwrap();
    let hash = &target.hashes["sha256"];
    repo.fetcher
        .serve(format!("{TARGETS_URL}/files/{hash}.app.bin"), b"apx".to_vec());

    let err = updater.download_target(&target).await.unwrap_err();

    assert!(
        matches!(
            err,
            Error::PinMismatch { ref role, pin: Pin::Hash { .. } } if role == "files/app.bin"
        ),
        "{err}"
    );
}

/// A target longer than its authenticated length is cut off by the fetch bound.
#[tokio::test]
async fn oversized_target_is_rejected() {
    let repo = delegated_repo(json!({}));
    let updater = updater(&repo);
    let target = updater.resolve_target("files/app.bin").await.unwrap().unwrap();
    let hash = &target.hashes["sha256"];
    repo.fetcher
        .serve(format!("{TARGETS_URL}/files/{hash}.app.bin"), b"app and more".to_vec());

    let err = updater.download_target(&target).await.unwrap_err();

    assert!(matches!(err, Error::LengthExceeded { max_length: 3, .. }), "{err}");
}
