//! Updater settings and their environment overrides.
//!
//! Defaults bound every fetch and every walk: the number of root rotations
//! per refresh, the delegation depth and fan-out, the per-role maximum file
//! sizes used when no parent pins a length, and the per-request timeout.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

const ENV_METADATA_BASE_URL: &str = "TUF_METADATA_BASE_URL";
const ENV_TARGETS_BASE_URL: &str = "TUF_TARGETS_BASE_URL";
const ENV_MAX_ROOT_ROTATIONS: &str = "TUF_MAX_ROOT_ROTATIONS";
const ENV_MAX_DELEGATION_DEPTH: &str = "TUF_MAX_DELEGATION_DEPTH";
const ENV_MAX_DELEGATED_FETCHES: &str = "TUF_MAX_DELEGATED_FETCHES";
const ENV_ROOT_MAX_LENGTH: &str = "TUF_ROOT_MAX_LENGTH";
const ENV_TIMESTAMP_MAX_LENGTH: &str = "TUF_TIMESTAMP_MAX_LENGTH";
const ENV_SNAPSHOT_MAX_LENGTH: &str = "TUF_SNAPSHOT_MAX_LENGTH";
const ENV_TARGETS_MAX_LENGTH: &str = "TUF_TARGETS_MAX_LENGTH";
const ENV_FETCH_TIMEOUT_SECS: &str = "TUF_FETCH_TIMEOUT_SECS";
const ENV_PREFIX_TARGETS_WITH_HASH: &str = "TUF_PREFIX_TARGETS_WITH_HASH";
const ENV_USER_AGENT: &str = "TUF_USER_AGENT";

/// Default user agent announced by the HTTP fetcher.
pub const DEFAULT_USER_AGENT: &str = concat!("tuf-client/", env!("CARGO_PKG_VERSION"));

/// Settings for [`crate::Updater`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterConfig {
    /// Base URL metadata file names are joined onto.
    pub metadata_base_url: String,
    /// Base URL target paths are joined onto.
    pub targets_base_url: String,
    /// Upper bound on root versions accepted during one refresh.
    pub max_root_rotations: u64,
    /// Upper bound on delegation edges followed from the top-level targets role.
    pub max_delegation_depth: usize,
    /// Upper bound on targets roles examined while resolving one path.
    pub max_delegated_fetches: usize,
    pub root_max_length: u64,
    pub timestamp_max_length: u64,
    /// Used when the timestamp does not pin the snapshot length.
    pub snapshot_max_length: u64,
    /// Used when the snapshot does not pin a targets length.
    pub targets_max_length: u64,
    pub fetch_timeout: Duration,
    /// Download targets as `<hash>.<name>` when the repository uses consistent snapshots.
    pub prefix_targets_with_hash: bool,
    pub user_agent: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            metadata_base_url: String::new(),
            targets_base_url: String::new(),
            max_root_rotations: 256,
            max_delegation_depth: 32,
            max_delegated_fetches: 32,
            root_max_length: 512_000,
            timestamp_max_length: 16_384,
            snapshot_max_length: 2_000_000,
            targets_max_length: 5_000_000,
            fetch_timeout: Duration::from_secs(15),
            prefix_targets_with_hash: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl UpdaterConfig {
    /// Default settings for a repository served at the given base URLs.
    pub fn new(metadata_base_url: impl Into<String>, targets_base_url: impl Into<String>) -> Self {
        Self {
            metadata_base_url: metadata_base_url.into(),
            targets_base_url: targets_base_url.into(),
            ..Self::default()
        }
    }

    /// Builds settings from the current process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from key/value pairs, keeping defaults for absent or invalid values.
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let defaults = Self::default();

        let string = |key: &str, default: String| {
            map.get(key)
                .and_then(|value| sanitize_non_empty(value))
                .unwrap_or(default)
        };

        Self {
            metadata_base_url: string(ENV_METADATA_BASE_URL, defaults.metadata_base_url),
            targets_base_url: string(ENV_TARGETS_BASE_URL, defaults.targets_base_url),
            max_root_rotations: parse_number(&map, ENV_MAX_ROOT_ROTATIONS, defaults.max_root_rotations),
            max_delegation_depth: parse_number(
                &map,
                ENV_MAX_DELEGATION_DEPTH,
                defaults.max_delegation_depth,
            ),
            max_delegated_fetches: parse_number(
                &map,
                ENV_MAX_DELEGATED_FETCHES,
                defaults.max_delegated_fetches,
            ),
            root_max_length: parse_number(&map, ENV_ROOT_MAX_LENGTH, defaults.root_max_length),
            timestamp_max_length: parse_number(
                &map,
                ENV_TIMESTAMP_MAX_LENGTH,
                defaults.timestamp_max_length,
            ),
            snapshot_max_length: parse_number(
                &map,
                ENV_SNAPSHOT_MAX_LENGTH,
                defaults.snapshot_max_length,
            ),
            targets_max_length: parse_number(
                &map,
                ENV_TARGETS_MAX_LENGTH,
                defaults.targets_max_length,
            ),
            fetch_timeout: Duration::from_secs(parse_number(
                &map,
                ENV_FETCH_TIMEOUT_SECS,
                defaults.fetch_timeout.as_secs(),
            )),
            prefix_targets_with_hash: parse_bool(
                map.get(ENV_PREFIX_TARGETS_WITH_HASH).map(String::as_str),
                defaults.prefix_targets_with_hash,
            ),
            user_agent: string(ENV_USER_AGENT, defaults.user_agent),
        }
    }
}

/// Trims the input and returns it if non-empty.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_number<T>(map: &HashMap<String, String>, key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    let Some(raw) = map.get(key).and_then(|value| sanitize_non_empty(value)) else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, "tuf: ignoring invalid numeric setting");
            default
        }
    }
}

/// Parses a permissive boolean, falling back to `default` when absent or ambiguous.
fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}
