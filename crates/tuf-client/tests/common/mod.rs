//! Repository fixtures shared by the integration tests.
//!
//! [`Repo`] signs metadata with deterministic keys and serves it through a
//! [`ScriptedFetcher`], which records every requested URL so tests can
//! assert which files were (and were not) downloaded.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tuf_client::{
    canonical, FetchError, Fetcher, FixedClock, Key, KeyId, MetadataStore, Signature, Updater,
    UpdaterConfig,
};

#[path = "../../src/fixture_keys.rs"]
mod fixture_keys;

pub use fixture_keys::{meta_entry, signed_file, target_entry, TestKey};

pub const METADATA_URL: &str = "https://repo.test/metadata";
pub const TARGETS_URL: &str = "https://repo.test/targets";
pub const FAR_FUTURE: &str = "2100-01-01T00:00:00Z";
pub const LONG_AGO: &str = "2020-01-01T00:00:00Z";

/// Time every fixture updater starts at.
pub fn reference_time() -> DateTime<Utc> {
    "2030-01-01T00:00:00Z".parse().expect("reference time")
}

pub fn metadata_url(file: &str) -> String {
    format!("{METADATA_URL}/{file}")
}

/// `keys` and `roles` of a delegations object whose roles all share `key`.
///
/// Each role is given as `(name, terminating, path pattern)`.
pub fn delegations(key: &TestKey, roles: &[(&str, bool, &str)]) -> Value {
    let roles: Vec<Value> = roles
        .iter()
        .map(|(name, terminating, pattern)| {
            json!({
                "name": name,
                "keyids": [key.id()],
                "threshold": 1,
                "terminating": terminating,
                "paths": [pattern],
            })
        })
        .collect();
    json!({
        "keys": { key.id().as_str(): key.public() },
        "roles": roles,
    })
}

/// Fetcher serving an in-memory file map; unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    files: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn serve(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(url.into(), bytes);
    }

    pub fn remove(&self, url: &str) {
        self.files.lock().unwrap().remove(url);
    }

    /// Makes the next `times` requests for `url` fail with a transport error.
    pub fn fail_times(&self, url: impl Into<String>, times: usize) {
        self.failures.lock().unwrap().insert(url.into(), times);
    }

    /// Every file currently served, keyed by URL.
    pub fn served(&self) -> BTreeMap<String, Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .map(|(url, bytes)| (url.clone(), bytes.clone()))
            .collect()
    }

    /// Returns and clears the request log.
    pub fn take_requests(&self) -> Vec<String> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|requested| requested.as_str() == url)
            .count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        url: &str,
        max_length: u64,
        _timeout: Duration,
    ) -> Result<Vec<u8>, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(remaining) = self.failures.lock().unwrap().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
        }
        let Some(bytes) = self.files.lock().unwrap().get(url).cloned() else {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                code: 404,
            });
        };
        if bytes.len() as u64 > max_length {
            return Err(FetchError::LengthExceeded {
                url: url.to_string(),
                max_length,
            });
        }
        Ok(bytes)
    }
}

/// Top-level files produced by [`Repo::publish_release`].
pub struct Release {
    pub timestamp: Vec<u8>,
    pub snapshot: Vec<u8>,
    pub targets: Vec<u8>,
}

/// A signed repository with one key per top-level role.
pub struct Repo {
    pub fetcher: Arc<ScriptedFetcher>,
    pub clock: Arc<FixedClock>,
    pub root_key: TestKey,
    pub timestamp_key: TestKey,
    pub snapshot_key: TestKey,
    pub targets_key: TestKey,
    /// Expiry written into every payload built from now on.
    pub expires: String,
    /// Root version 1, used as the client's trust anchor.
    pub bootstrap: Vec<u8>,
}

impl Repo {
    pub fn new() -> Self {
        let mut repo = Self {
            fetcher: Arc::new(ScriptedFetcher::default()),
            clock: Arc::new(FixedClock::new(reference_time())),
            root_key: TestKey::new(1),
            timestamp_key: TestKey::new(2),
            snapshot_key: TestKey::new(3),
            targets_key: TestKey::new(4),
            expires: FAR_FUTURE.to_string(),
            bootstrap: Vec::new(),
        };
        repo.bootstrap = repo.root(1);
        repo
    }

    pub fn root_json(&self, version: u64) -> Value {
        let mut keys = serde_json::Map::new();
        for key in [
            &self.root_key,
            &self.timestamp_key,
            &self.snapshot_key,
            &self.targets_key,
        ] {
            keys.insert(
                key.id().as_str().to_string(),
                serde_json::to_value(key.public()).expect("key"),
            );
        }
        let role = |key: &TestKey| json!({ "keyids": [key.id()], "threshold": 1 });
        json!({
            "_type": "root",
            "spec_version": "1.0.31",
            "version": version,
            "expires": self.expires,
            "consistent_snapshot": true,
            "keys": keys,
            "roles": {
                "root": role(&self.root_key),
                "timestamp": role(&self.timestamp_key),
                "snapshot": role(&self.snapshot_key),
                "targets": role(&self.targets_key),
            }
        })
    }

    /// Root `version` signed by the current root key only.
    pub fn root(&self, version: u64) -> Vec<u8> {
        signed_file(&self.root_json(version), &[&self.root_key])
    }

    pub fn publish_root(&self, version: u64, bytes: Vec<u8>) {
        self.fetcher
            .serve(metadata_url(&format!("{version}.root.json")), bytes);
    }

    pub fn timestamp(&self, version: u64, snapshot_version: u64, snapshot: &[u8]) -> Vec<u8> {
        let signed = json!({
            "_type": "timestamp",
            "spec_version": "1.0.31",
            "version": version,
            "expires": self.expires,
            "meta": { "snapshot.json": meta_entry(snapshot_version, snapshot) },
        });
        signed_file(&signed, &[&self.timestamp_key])
    }

    pub fn publish_timestamp(&self, version: u64, snapshot_version: u64, snapshot: &[u8]) -> Vec<u8> {
        let bytes = self.timestamp(version, snapshot_version, snapshot);
        self.fetcher.serve(metadata_url("timestamp.json"), bytes.clone());
        bytes
    }

    pub fn snapshot(&self, version: u64, meta: Value) -> Vec<u8> {
        let signed = json!({
            "_type": "snapshot",
            "spec_version": "1.0.31",
            "version": version,
            "expires": self.expires,
            "meta": meta,
        });
        signed_file(&signed, &[&self.snapshot_key])
    }

    pub fn publish_snapshot(&self, version: u64, meta: Value) -> Vec<u8> {
        let bytes = self.snapshot(version, meta);
        self.fetcher.serve(
            metadata_url(&format!("{version}.snapshot.json")),
            bytes.clone(),
        );
        bytes
    }

    pub fn targets_json(&self, version: u64, targets: Value, delegations: Option<Value>) -> Value {
        let mut signed = json!({
            "_type": "targets",
            "spec_version": "1.0.31",
            "version": version,
            "expires": self.expires,
            "targets": targets,
        });
        if let Some(delegations) = delegations {
            signed["delegations"] = delegations;
        }
        signed
    }

    pub fn publish_targets(&self, version: u64, targets: Value, delegations: Option<Value>) -> Vec<u8> {
        let bytes = signed_file(
            &self.targets_json(version, targets, delegations),
            &[&self.targets_key],
        );
        self.fetcher.serve(
            metadata_url(&format!("{version}.targets.json")),
            bytes.clone(),
        );
        bytes
    }

    /// Publishes delegated role `role` signed by `signer`.
    pub fn publish_delegated(
        &self,
        role: &str,
        version: u64,
        signer: &TestKey,
        targets: Value,
    ) -> Vec<u8> {
        let bytes = signed_file(&self.targets_json(version, targets, None), &[signer]);
        self.fetcher.serve(
            metadata_url(&format!("{version}.{role}.json")),
            bytes.clone(),
        );
        bytes
    }

    /// Publishes targets, snapshot and timestamp all at `version`.
    pub fn publish_release(&self, version: u64, targets: Value) -> Release {
        let targets = self.publish_targets(version, targets, None);
        let snapshot =
            self.publish_snapshot(version, json!({ "targets.json": meta_entry(version, &targets) }));
        let timestamp = self.publish_timestamp(version, version, &snapshot);
        Release {
            timestamp,
            snapshot,
            targets,
        }
    }

    /// Serves `content` at its hash-prefixed target URL.
    pub fn serve_target(&self, path: &str, content: &[u8]) {
        let hash = hex::encode(Sha256::digest(content));
        let file = match path.rsplit_once('/') {
            Some((dir, name)) => format!("{dir}/{hash}.{name}"),
            None => format!("{hash}.{path}"),
        };
        self.fetcher
            .serve(format!("{TARGETS_URL}/{file}"), content.to_vec());
    }

    pub fn config(&self) -> UpdaterConfig {
        UpdaterConfig::new(METADATA_URL, TARGETS_URL)
    }

    /// Updater over this repository, bootstrapped from root version 1.
    pub fn updater(&self, store: Arc<dyn MetadataStore>) -> Updater {
        Updater::new(self.config(), self.fetcher.clone(), store)
            .with_bootstrap_root(self.bootstrap.clone())
            .with_clock(self.clock.clone())
    }
}
