//! Refresh and target resolution against a remote repository.
//!
//! The updater owns the currently published [`TrustedMetadataSet`]. Every
//! refresh builds a private working set from the persisted root, walks it
//! through root rotation, timestamp, snapshot and top-level targets, and only
//! then publishes it. Readers take an `Arc` of the published set and never
//! see a working set. Refreshes and delegated loads are serialized by an
//! async mutex.
//!
//! Only verified bytes are persisted, and each accepted root is persisted
//! before the next one is requested.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backoff::{BackoffConfig, BackoffState};
use crate::clock::{Clock, SystemClock};
use crate::config::UpdaterConfig;
use crate::delegation::{ResolvedTarget, SearchStep, TargetSearch};
use crate::error::{Error, Result};
use crate::fetcher::{FetchError, Fetcher};
use crate::layout::{join_url, root_filename, target_filename};
use crate::metadata::{MetaFile, RoleType};
use crate::store::MetadataStore;
use crate::telemetry::{NoopTelemetry, UpdaterTelemetry};
use crate::trusted::{Source, TrustState, TrustedMetadataSet};

/// Client-side TUF updater.
pub struct Updater {
    config: UpdaterConfig,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn UpdaterTelemetry>,
    /// Caller-supplied trust anchor used when no usable root is persisted.
    bootstrap_root: Option<Vec<u8>>,
    published: RwLock<Option<Arc<TrustedMetadataSet>>>,
    update_lock: Mutex<()>,
}

impl fmt::Debug for Updater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Updater")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher)
            .field("store", &self.store)
            .field("trusted_root_version", &self.trusted_root_version())
            .finish()
    }
}

impl Updater {
    pub fn new(
        config: UpdaterConfig,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config,
            fetcher,
            store,
            clock: Arc::new(SystemClock),
            telemetry: Arc::new(NoopTelemetry),
            bootstrap_root: None,
            published: RwLock::new(None),
            update_lock: Mutex::new(()),
        }
    }

    /// Supplies the initial trust anchor for a client without a persisted root.
    pub fn with_bootstrap_root(mut self, root: impl Into<Vec<u8>>) -> Self {
        self.bootstrap_root = Some(root.into());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn UpdaterTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// The currently published trusted set, if any refresh has published one.
    pub fn trusted(&self) -> Option<Arc<TrustedMetadataSet>> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Version of the root the published set trusts.
    pub fn trusted_root_version(&self) -> Option<u64> {
        self.trusted().map(|set| set.root().signed.version)
    }

    fn publish(&self, set: Arc<TrustedMetadataSet>) {
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = Some(set);
    }

    /// Brings the trusted set up to date with the repository.
    ///
    /// On failure the previously published set stays readable. A newer root
    /// accepted before the failure is persisted, and the published set moves
    /// onto it when the timestamp, snapshot and targets keys did not change.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.update_lock.lock().await;
        match self.refresh_locked().await {
            Ok(set) => {
                let version = set.root().signed.version;
                info!(root_version = version, "tuf: refresh complete");
                self.telemetry.on_refresh_success(version);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "tuf: refresh failed");
                self.telemetry.on_refresh_error(&err);
                Err(err)
            }
        }
    }

    /// Calls [`Self::refresh`] up to `attempts` times, sleeping between
    /// retryable failures. Verification failures are returned immediately.
    pub async fn refresh_with_retry(&self, attempts: usize, backoff: BackoffConfig) -> Result<()> {
        let mut state = BackoffState::new(backoff);
        let mut attempt = 1;
        loop {
            match self.refresh().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = state.register_error();
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "tuf: retrying refresh"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn refresh_locked(&self) -> Result<Arc<TrustedMetadataSet>> {
        let now = self.clock.now();
        let mut working = self.load_trust_anchor(now)?;
        match self.update_chain(&mut working).await {
            Ok(()) => {
                let set = Arc::new(working);
                self.publish(set.clone());
                Ok(set)
            }
            Err(err) => {
                if working.root_rotated() {
                    self.publish_rotated_root(working);
                }
                Err(err)
            }
        }
    }

    /// Records a root accepted by a refresh that failed later on.
    ///
    /// The last complete set stays readable: it moves onto the new root when
    /// that root kept the timestamp, snapshot and targets keys, and is left
    /// untouched otherwise. The partial set is published only when no
    /// complete set was published before.
    fn publish_rotated_root(&self, working: TrustedMetadataSet) {
        let root_version = working.root().signed.version;
        let complete = self
            .trusted()
            .filter(|previous| previous.state() == TrustState::HaveTargets);
        match complete {
            Some(previous) => match previous.carry_forward(&working) {
                Some(carried) => {
                    info!(root_version, "tuf: last complete set moved to rotated root");
                    self.publish(Arc::new(carried));
                }
                None => warn!(
                    root_version,
                    "tuf: rotated root changed role keys, keeping last complete set"
                ),
            },
            None => {
                warn!(root_version, "tuf: publishing rotated root from failed refresh");
                self.publish(Arc::new(working));
            }
        }
    }

    /// Persisted root if usable, else the caller's bootstrap root.
    fn load_trust_anchor(&self, now: chrono::DateTime<chrono::Utc>) -> Result<TrustedMetadataSet> {
        match self.store.load(RoleType::Root.as_str()) {
            Ok(Some(bytes)) => match TrustedMetadataSet::new(&bytes, now) {
                Ok(set) => return Ok(set),
                Err(err) => {
                    warn!(error = %err, "tuf: persisted root is unusable, using bootstrap root")
                }
            },
            Ok(None) => debug!("tuf: no persisted root"),
            Err(err) => warn!(error = %err, "tuf: failed to read persisted root"),
        }
        let bytes = self.bootstrap_root.as_deref().ok_or(Error::BootstrapMissing)?;
        let set = TrustedMetadataSet::new(bytes, now)?;
        self.store.store(RoleType::Root.as_str(), bytes)?;
        Ok(set)
    }

    async fn update_chain(&self, working: &mut TrustedMetadataSet) -> Result<()> {
        let initial_roles = working.root().signed.roles.clone();
        self.rotate_root(working).await?;
        working.check_root_expiry()?;

        // Cached baselines signed by rotated-out keys cannot be trusted.
        let current_roles = &working.root().signed.roles;
        let rotated = |role: RoleType| {
            initial_roles.get(role.as_str()) != current_roles.get(role.as_str())
        };
        let keep_timestamp = !rotated(RoleType::Timestamp);
        let keep_snapshot = !rotated(RoleType::Snapshot);

        self.update_timestamp(working, keep_timestamp).await?;
        self.update_snapshot(working, keep_snapshot).await?;
        self.load_targets_role(working, RoleType::Targets.as_str(), None)
            .await
    }

    async fn rotate_root(&self, working: &mut TrustedMetadataSet) -> Result<()> {
        for _ in 0..self.config.max_root_rotations {
            let next = working.root().signed.version.saturating_add(1);
            let url = join_url(&self.config.metadata_base_url, &root_filename(next));
            let bytes = match self
                .fetch_metadata("root", &url, self.config.root_max_length)
                .await
            {
                Ok(bytes) => bytes,
                Err(err) if err.is_not_found() => {
                    debug!(version = next, "tuf: no newer root published");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            working.load_root(&bytes)?;
            self.store.store(RoleType::Root.as_str(), &bytes)?;
        }
        warn!(
            max_root_rotations = self.config.max_root_rotations,
            "tuf: root rotation limit reached"
        );
        Ok(())
    }

    async fn update_timestamp(&self, working: &mut TrustedMetadataSet, use_cache: bool) -> Result<()> {
        let role = RoleType::Timestamp.as_str();
        if use_cache {
            if let Some(cached) = self.load_cached(role) {
                if let Err(err) = working.load_timestamp(&cached, Source::LocalCache) {
                    debug!(error = %err, "tuf: cached timestamp ignored");
                }
            }
        }
        let url = join_url(&self.config.metadata_base_url, "timestamp.json");
        let bytes = self
            .fetch_metadata(role, &url, self.config.timestamp_max_length)
            .await?;
        working.load_timestamp(&bytes, Source::Repository)?;
        self.store.store(role, &bytes)?;
        Ok(())
    }

    async fn update_snapshot(&self, working: &mut TrustedMetadataSet, use_cache: bool) -> Result<()> {
        let role = RoleType::Snapshot.as_str();
        if use_cache {
            if let Some(cached) = self.load_cached(role) {
                if let Err(err) = working.load_snapshot(&cached, Source::LocalCache) {
                    debug!(error = %err, "tuf: cached snapshot ignored");
                }
            }
        }
        if working.has_final_snapshot() {
            debug!("tuf: cached snapshot is current");
            return Ok(());
        }
        let pin = working
            .timestamp()
            .map(|timestamp| timestamp.signed.meta.snapshot.clone())
            .ok_or_else(|| Error::OutOfOrder {
                role: role.to_string(),
                state: working.state(),
            })?;
        let consistent = working.root().signed.consistent_snapshot;
        let file = self
            .store
            .persisted_filename_for(role, pin.version, consistent);
        let url = join_url(&self.config.metadata_base_url, &file);
        let max_length = fetch_bound(&pin, self.config.snapshot_max_length);
        let bytes = self.fetch_metadata(role, &url, max_length).await?;
        working.load_snapshot(&bytes, Source::Repository)?;
        self.store.store(role, &bytes)?;
        Ok(())
    }

    /// Loads `role` into `working`, from the cache when it is current and
    /// from the repository otherwise.
    async fn load_targets_role(
        &self,
        working: &mut TrustedMetadataSet,
        role: &str,
        delegator: Option<&str>,
    ) -> Result<()> {
        if let Some(cached) = self.load_cached(role) {
            if let Err(err) = working.load_targets(&cached, role, delegator, Source::LocalCache) {
                debug!(role, error = %err, "tuf: cached targets ignored");
            }
        }
        if working.final_targets(role).is_some() {
            debug!(role, "tuf: cached targets are current");
            return Ok(());
        }
        let pin = working
            .snapshot()
            .and_then(|snapshot| snapshot.signed.meta_for(role).cloned())
            .ok_or_else(|| Error::UnknownRole {
                role: role.to_string(),
                listed_in: "snapshot".to_string(),
            })?;
        let consistent = working.root().signed.consistent_snapshot;
        let file = self
            .store
            .persisted_filename_for(role, pin.version, consistent);
        let url = join_url(&self.config.metadata_base_url, &file);
        let max_length = fetch_bound(&pin, self.config.targets_max_length);
        let bytes = self.fetch_metadata(role, &url, max_length).await?;
        working.load_targets(&bytes, role, delegator, Source::Repository)?;
        self.store.store(role, &bytes)?;
        Ok(())
    }

    /// Resolves `path` to authenticated target information.
    ///
    /// Returns `Ok(None)` when no trusted role lists the path and
    /// [`Error::DelegationNotFound`] when a terminating delegation claimed it
    /// without listing it.
    pub async fn resolve_target(&self, path: &str) -> Result<Option<ResolvedTarget>> {
        let mut set = match self.trusted() {
            Some(set) if set.state() == TrustState::HaveTargets => set,
            _ => {
                self.refresh().await?;
                self.trusted().ok_or(Error::BootstrapMissing)?
            }
        };
        set.check_consumable(self.clock.now())?;

        let mut search = TargetSearch::new(
            path,
            self.config.max_delegation_depth,
            self.config.max_delegated_fetches,
        );
        loop {
            match search.step(&set) {
                SearchStep::Found(target) => return Ok(Some(target)),
                SearchStep::Exhausted => {
                    debug!(path, "tuf: target not found");
                    return Ok(None);
                }
                SearchStep::Terminated { role } => {
                    return Err(Error::DelegationNotFound {
                        path: path.to_string(),
                        role,
                    })
                }
                SearchStep::NeedsRole { role, delegator } => {
                    set = self.load_delegated(&set, &role, &delegator).await?;
                }
            }
        }
    }

    /// Loads a delegated role on top of `base` and publishes the result if
    /// `base` is still the published set.
    async fn load_delegated(
        &self,
        base: &Arc<TrustedMetadataSet>,
        role: &str,
        delegator: &str,
    ) -> Result<Arc<TrustedMetadataSet>> {
        let _guard = self.update_lock.lock().await;
        let mut working = TrustedMetadataSet::clone(base);
        working.set_reference_time(self.clock.now());
        self.load_targets_role(&mut working, role, Some(delegator))
            .await?;
        self.telemetry.on_delegated_role_loaded(role);
        info!(role, delegator, "tuf: delegated role loaded");

        let working = Arc::new(working);
        let still_current = self
            .trusted()
            .map_or(false, |published| Arc::ptr_eq(&published, base));
        if still_current {
            self.publish(working.clone());
        }
        Ok(working)
    }

    /// Downloads a resolved target and checks it against its authenticated
    /// length and hashes.
    pub async fn download_target(&self, target: &ResolvedTarget) -> Result<Vec<u8>> {
        let consistent = self
            .trusted()
            .map_or(false, |set| set.root().signed.consistent_snapshot);
        let hash = if consistent && self.config.prefix_targets_with_hash {
            target.hashes.values().next().map(String::as_str)
        } else {
            None
        };
        let url = join_url(
            &self.config.targets_base_url,
            &target_filename(&target.path, hash),
        );
        let bytes = self
            .fetcher
            .fetch(&url, target.length, self.config.fetch_timeout)
            .await?;
        target.verify(&bytes)?;
        debug!(path = %target.path, len = bytes.len(), "tuf: target downloaded");
        Ok(bytes)
    }

    async fn fetch_metadata(
        &self,
        role: &str,
        url: &str,
        max_length: u64,
    ) -> std::result::Result<Vec<u8>, FetchError> {
        let bytes = self
            .fetcher
            .fetch(url, max_length, self.config.fetch_timeout)
            .await?;
        self.telemetry.on_metadata_fetched(role, bytes.len());
        Ok(bytes)
    }

    fn load_cached(&self, role: &str) -> Option<Vec<u8>> {
        match self.store.load(role) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(role, error = %err, "tuf: failed to read cached metadata");
                None
            }
        }
    }
}

/// Fetch bound for a file pinned by `pin`.
///
/// The bound is the configured maximum, raised to the pinned length, so an
/// oversized file is read and reported as a pin mismatch by the load.
fn fetch_bound(pin: &MetaFile, configured: u64) -> u64 {
    pin.length.map_or(configured, |length| length.max(configured))
}
