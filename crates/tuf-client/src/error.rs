//! Error taxonomy surfaced by refresh and target resolution.
//!
//! Each variant is a distinct failure class so callers can branch on it.
//! Verification failures are never retried or downgraded inside the crate:
//! they may indicate an active attack. Only [`Error::Transport`] and
//! [`Error::LengthExceeded`] are reported as retryable.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::fetcher::FetchError;
use crate::store::StoreError;
use crate::trusted::TrustState;

/// Describes which value pinned by a parent role failed to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pin {
    /// The metadata version differs from the pinned version.
    Version { expected: u64, actual: u64 },
    /// The downloaded length differs from the pinned length.
    Length { expected: u64, actual: u64 },
    /// The digest for `algorithm` differs from the pinned digest.
    Hash { algorithm: String },
    /// No supported hash algorithm was available to check the content.
    NoSupportedHash,
}

impl std::fmt::Display for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pin::Version { expected, actual } => {
                write!(f, "version {actual} does not match pinned version {expected}")
            }
            Pin::Length { expected, actual } => {
                write!(f, "length {actual} does not match pinned length {expected}")
            }
            Pin::Hash { algorithm } => write!(f, "{algorithm} digest does not match"),
            Pin::NoSupportedHash => write!(f, "no supported hash algorithm pinned"),
        }
    }
}

/// Errors returned by the trusted metadata set and the updater.
#[derive(Debug, Error)]
pub enum Error {
    /// Network, DNS, TLS, timeout, malformed URL, or non-success HTTP status.
    #[error("transport error: {0}")]
    Transport(FetchError),
    /// The remote served more bytes than the configured bound.
    #[error("{url} exceeded the maximum length of {max_length} bytes")]
    LengthExceeded { url: String, max_length: u64 },
    /// Fewer valid unique-key signatures than the role threshold.
    #[error("role '{role}' has {valid} valid signatures, threshold is {threshold}")]
    SignatureThreshold {
        role: String,
        valid: usize,
        threshold: u32,
    },
    /// Version decreased, or the version is unchanged but the content differs.
    #[error("rollback detected for '{role}': trusted version {trusted}, received {received}")]
    Rollback {
        role: String,
        trusted: u64,
        received: u64,
    },
    /// Metadata expired before the reference time.
    #[error("metadata for '{role}' expired at {expires}")]
    Expired { role: String, expires: DateTime<Utc> },
    /// A version, length, or hash pinned by a parent role did not match.
    #[error("pin mismatch for '{role}': {pin}")]
    PinMismatch { role: String, pin: Pin },
    /// The snapshot dropped a role the previous snapshot tracked.
    #[error("snapshot no longer lists role '{role}'")]
    RoleRemoved { role: String },
    /// A terminating delegation matched the path but no target was found below it.
    #[error("target '{path}' not found below terminating delegation '{role}'")]
    DelegationNotFound { path: String, role: String },
    /// The document failed to parse or violates the metadata schema.
    #[error("malformed metadata for '{role}': {reason}")]
    Malformed { role: String, reason: String },
    /// No persisted root and no caller-supplied trust anchor.
    #[error("no trusted root available to bootstrap from")]
    BootstrapMissing,
    /// A role is not listed where it must be (snapshot meta or a delegation list).
    #[error("role '{role}' is not known to {listed_in}")]
    UnknownRole { role: String, listed_in: String },
    /// A load was attempted in a state that does not permit it.
    #[error("cannot load '{role}' while in state {state:?}")]
    OutOfOrder { role: String, state: TrustState },
    /// Local persistence failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// Returns `true` for ambiguous transport-layer failures a caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::LengthExceeded { .. })
    }

    pub(crate) fn malformed(role: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Malformed {
            role: role.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::LengthExceeded { url, max_length } => {
                Error::LengthExceeded { url, max_length }
            }
            other => Error::Transport(other),
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
