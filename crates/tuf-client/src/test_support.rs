#![cfg(test)]
//! Signing fixtures shared by the unit tests.
//!
//! Keys are derived from a one-byte seed so every test builds the same
//! repository bytes.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use crate::canonical;
use crate::keys::{Key, KeyId, Signature};

#[path = "fixture_keys.rs"]
mod fixture_keys;

pub(crate) use fixture_keys::{meta_entry, sign, signed_file, target_entry, TestKey};

/// Expiry used by fixtures that should never expire during a test run.
pub(crate) const FAR_FUTURE: &str = "2100-01-01T00:00:00Z";

fn role_entry(keys: &[&TestKey], threshold: u32) -> Value {
    json!({
        "keyids": keys.iter().map(|k| k.id()).collect::<Vec<_>>(),
        "threshold": threshold,
    })
}

/// Root payload assigning each key list to its role.
pub(crate) fn root_json(
    version: u64,
    root: &[&TestKey],
    timestamp: &[&TestKey],
    snapshot: &[&TestKey],
    targets: &[&TestKey],
    threshold: u32,
) -> Value {
    let mut keys = serde_json::Map::new();
    for key in root.iter().chain(timestamp).chain(snapshot).chain(targets) {
        keys.insert(
            key.id().as_str().to_string(),
            serde_json::to_value(key.public()).expect("key"),
        );
    }
    json!({
        "_type": "root",
        "spec_version": "1.0.31",
        "version": version,
        "expires": FAR_FUTURE,
        "consistent_snapshot": true,
        "keys": keys,
        "roles": {
            "root": role_entry(root, threshold),
            "timestamp": role_entry(timestamp, threshold),
            "snapshot": role_entry(snapshot, threshold),
            "targets": role_entry(targets, threshold),
        }
    })
}

pub(crate) fn timestamp_json(version: u64, snapshot: Value) -> Value {
    json!({
        "_type": "timestamp",
        "spec_version": "1.0.31",
        "version": version,
        "expires": FAR_FUTURE,
        "meta": { "snapshot.json": snapshot },
    })
}

pub(crate) fn snapshot_json(version: u64, meta: Value) -> Value {
    json!({
        "_type": "snapshot",
        "spec_version": "1.0.31",
        "version": version,
        "expires": FAR_FUTURE,
        "meta": meta,
    })
}

pub(crate) fn targets_json(version: u64, targets: Value, delegations: Option<Value>) -> Value {
    let mut signed = json!({
        "_type": "targets",
        "spec_version": "1.0.31",
        "version": version,
        "expires": FAR_FUTURE,
        "targets": targets,
    });
    if let Some(delegations) = delegations {
        signed["delegations"] = delegations;
    }
    signed
}

/// Replaces the `expires` field of a payload.
pub(crate) fn with_expires(mut signed: Value, expires: DateTime<Utc>) -> Value {
    signed["expires"] = json!(expires.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    signed
}

pub(crate) fn yesterday() -> DateTime<Utc> {
    Utc::now() - Duration::days(1)
}

/// One key per top-level role plus helpers producing a consistent repository.
pub(crate) struct RepoKeys {
    pub root: TestKey,
    pub timestamp: TestKey,
    pub snapshot: TestKey,
    pub targets: TestKey,
}

/// Signed top-level files of one repository version.
pub(crate) struct RepoFiles {
    pub root: Vec<u8>,
    pub timestamp: Vec<u8>,
    pub snapshot: Vec<u8>,
    pub targets: Vec<u8>,
}

impl RepoKeys {
    pub(crate) fn new() -> Self {
        Self {
            root: TestKey::new(1),
            timestamp: TestKey::new(2),
            snapshot: TestKey::new(3),
            targets: TestKey::new(4),
        }
    }

    pub(crate) fn root_json(&self, version: u64) -> Value {
        root_json(
            version,
            &[&self.root],
            &[&self.timestamp],
            &[&self.snapshot],
            &[&self.targets],
            1,
        )
    }

    pub(crate) fn root(&self, version: u64) -> Vec<u8> {
        signed_file(&self.root_json(version), &[&self.root])
    }

    pub(crate) fn timestamp(&self, version: u64, snapshot_version: u64, snapshot: &[u8]) -> Vec<u8> {
        signed_file(
            &timestamp_json(version, meta_entry(snapshot_version, snapshot)),
            &[&self.timestamp],
        )
    }

    pub(crate) fn snapshot(&self, version: u64, meta: Value) -> Vec<u8> {
        signed_file(&snapshot_json(version, meta), &[&self.snapshot])
    }

    pub(crate) fn targets(&self, version: u64, targets: Value, delegations: Option<Value>) -> Vec<u8> {
        signed_file(&targets_json(version, targets, delegations), &[&self.targets])
    }

    /// A complete repository where every role carries `version`.
    pub(crate) fn files(&self, version: u64, targets: Value) -> RepoFiles {
        let targets = self.targets(version, targets, None);
        let snapshot = self.snapshot(version, json!({ "targets.json": meta_entry(version, &targets) }));
        let timestamp = self.timestamp(version, version, &snapshot);
        RepoFiles {
            root: self.root(1),
            timestamp,
            snapshot,
            targets,
        }
    }
}
