//! Client-side TUF metadata verification and target resolution.
//!
//! [`Updater`] refreshes the trusted chain of root, timestamp, snapshot and
//! targets metadata from a repository and resolves target paths through
//! delegations to authenticated lengths and hashes. [`TrustedMetadataSet`]
//! is the verification core it drives; it performs no I/O and can be used on
//! its own with bytes obtained elsewhere.

pub mod backoff;
pub mod canonical;
pub mod clock;
pub mod config;
pub mod delegation;
pub mod error;
pub mod fetcher;
pub mod keys;
pub mod layout;
pub mod metadata;
pub mod store;
pub mod telemetry;
pub mod trusted;
pub mod updater;

#[cfg(test)]
mod test_support;

pub use backoff::{BackoffConfig, BackoffState};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{UpdaterConfig, DEFAULT_USER_AGENT};
pub use delegation::{ResolvedTarget, SearchStep, TargetSearch};
pub use error::{Error, Pin, Result};
pub use fetcher::{FetchError, Fetcher, HttpFetcher};
pub use keys::{Key, KeyId, Role, Signature};
pub use metadata::{
    DelegatedRole, Delegations, Envelope, MetaFile, RoleType, Root, Snapshot, SuccinctRoles,
    TargetFile, Targets, Timestamp,
};
pub use store::{FsStore, MemoryStore, MetadataStore, StoreError};
pub use telemetry::{
    CountingTelemetry, NoopTelemetry, TelemetryCounters, TelemetrySnapshot, UpdaterTelemetry,
};
pub use trusted::{Freshness, Source, TrustState, TrustedMetadataSet};
pub use updater::Updater;
