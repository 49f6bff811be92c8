//! Telemetry hooks for refreshes and metadata loads.
//!
//! [`UpdaterTelemetry`] is the observer interface the updater calls into.
//! [`CountingTelemetry`] keeps relaxed atomic counters that an embedder can
//! export to whatever metric backend it uses.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Error;

/// Observer notified by [`crate::Updater`]; every hook defaults to a no-op.
pub trait UpdaterTelemetry: Send + Sync {
    /// Called after a refresh published a complete set.
    fn on_refresh_success(&self, _root_version: u64) {}
    /// Called when a refresh attempt fails.
    fn on_refresh_error(&self, _error: &Error) {}
    /// Called for every successful metadata download.
    fn on_metadata_fetched(&self, _role: &str, _bytes: usize) {}
    /// Called when a delegated targets role is loaded during resolution.
    fn on_delegated_role_loaded(&self, _role: &str) {}
}

/// Telemetry implementation that performs no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl UpdaterTelemetry for NoopTelemetry {}

/// Aggregated telemetry counters (all values use relaxed atomics).
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    refresh_success: AtomicU64,
    refresh_error: AtomicU64,
    retryable_error: AtomicU64,
    metadata_fetched: AtomicU64,
    metadata_bytes: AtomicU64,
    delegated_roles_loaded: AtomicU64,
    root_version: AtomicU64,
}

impl TelemetryCounters {
    /// Captures a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            refresh_success: self.refresh_success.load(Ordering::Relaxed),
            refresh_error: self.refresh_error.load(Ordering::Relaxed),
            retryable_error: self.retryable_error.load(Ordering::Relaxed),
            metadata_fetched: self.metadata_fetched.load(Ordering::Relaxed),
            metadata_bytes: self.metadata_bytes.load(Ordering::Relaxed),
            delegated_roles_loaded: self.delegated_roles_loaded.load(Ordering::Relaxed),
            root_version: self.root_version.load(Ordering::Relaxed),
        }
    }
}

/// Plain data representation of [`TelemetryCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub refresh_success: u64,
    pub refresh_error: u64,
    /// Subset of `refresh_error` a caller may retry.
    pub retryable_error: u64,
    pub metadata_fetched: u64,
    pub metadata_bytes: u64,
    pub delegated_roles_loaded: u64,
    /// Root version trusted after the latest successful refresh.
    pub root_version: u64,
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "refresh_success={}, refresh_error={}, retryable_error={}, metadata_fetched={}, metadata_bytes={}, delegated_roles_loaded={}, root_version={}",
            self.refresh_success,
            self.refresh_error,
            self.retryable_error,
            self.metadata_fetched,
            self.metadata_bytes,
            self.delegated_roles_loaded,
            self.root_version
        )
    }
}

/// Telemetry implementation that maintains atomic counters for every signal.
#[derive(Debug, Clone)]
pub struct CountingTelemetry {
    counters: Arc<TelemetryCounters>,
}

impl CountingTelemetry {
    pub fn new(counters: Arc<TelemetryCounters>) -> Self {
        Self { counters }
    }

    /// Returns the underlying counter set.
    pub fn counters(&self) -> Arc<TelemetryCounters> {
        self.counters.clone()
    }
}

impl Default for CountingTelemetry {
    fn default() -> Self {
        Self::new(Arc::new(TelemetryCounters::default()))
    }
}

impl UpdaterTelemetry for CountingTelemetry {
    fn on_refresh_success(&self, root_version: u64) {
        self.counters
            .refresh_success
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .root_version
            .store(root_version, Ordering::Relaxed);
    }

    fn on_refresh_error(&self, error: &Error) {
        self.counters.refresh_error.fetch_add(1, Ordering::Relaxed);
        if error.is_retryable() {
            self.counters
                .retryable_error
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_metadata_fetched(&self, _role: &str, bytes: usize) {
        self.counters
            .metadata_fetched
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .metadata_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn on_delegated_role_loaded(&self, _role: &str) {
        self.counters
            .delegated_roles_loaded
            .fetch_add(1, Ordering::Relaxed);
    }
}
