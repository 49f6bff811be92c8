//! Schema-validated TUF metadata payloads and the signed envelope.
//!
//! Parsing keeps the exact `signed` JSON value that arrived on the wire:
//! the canonical bytes used for signature checks are encoded from that value
//! and the typed payload is deserialized from the same value. Nothing is ever
//! re-serialized from the typed structs for verification.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

use crate::canonical;
use crate::error::{Error, Pin, Result};
use crate::keys::{Authorization, Key, KeyId, Role, Signature};

/// Major version of the metadata format this client understands.
const SUPPORTED_SPEC_MAJOR: &str = "1";

/// The four roles every repository publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleType {
    Root,
    Timestamp,
    Snapshot,
    Targets,
}

impl RoleType {
    /// Role name as used in `roles` tables and file names.
    pub fn as_str(self) -> &'static str {
        match self {
            RoleType::Root => "root",
            RoleType::Timestamp => "timestamp",
            RoleType::Snapshot => "snapshot",
            RoleType::Targets => "targets",
        }
    }

    /// Returns `true` if `name` is one of the top-level role names.
    pub fn is_top_level(name: &str) -> bool {
        matches!(name, "root" | "timestamp" | "snapshot" | "targets")
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behaviour shared by every signed payload type.
pub trait Payload: DeserializeOwned {
    /// Expected value of the `_type` field.
    const TYPE: &'static str;

    fn version(&self) -> u64;

    fn expires(&self) -> DateTime<Utc>;

    fn spec_version(&self) -> &str;

    /// Type-specific schema checks beyond what serde enforces.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[derive(Deserialize)]
struct WireEnvelope {
    signed: Value,
    signatures: Vec<Signature>,
}

/// A parsed payload together with its signatures and the bytes they cover.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub signed: T,
    pub signatures: Vec<Signature>,
    canonical: Vec<u8>,
    raw: Vec<u8>,
}

impl<T: Payload> Envelope<T> {
    /// Parses `raw` as the metadata file of `role`.
    pub fn from_slice(role: &str, raw: &[u8]) -> Result<Self> {
        let wire: WireEnvelope =
            serde_json::from_slice(raw).map_err(|err| Error::malformed(role, err))?;
        let kind = wire.signed.get("_type").and_then(Value::as_str);
        if kind != Some(T::TYPE) {
            return Err(Error::malformed(
                role,
                format!("expected _type '{}', found {:?}", T::TYPE, kind),
            ));
        }
        let canonical = canonical::encode(&wire.signed).map_err(|err| Error::malformed(role, err))?;
        let signed = T::deserialize(&wire.signed).map_err(|err| Error::malformed(role, err))?;
        if signed.version() == 0 {
            return Err(Error::malformed(role, "version must be at least 1"));
        }
        let major = signed.spec_version().split('.').next().unwrap_or_default();
        if major != SUPPORTED_SPEC_MAJOR {
            return Err(Error::malformed(
                role,
                format!("unsupported spec_version '{}'", signed.spec_version()),
            ));
        }
        signed
            .validate()
            .map_err(|reason| Error::malformed(role, reason))?;
        Ok(Self {
            signed,
            signatures: wire.signatures,
            canonical,
            raw: raw.to_vec(),
        })
    }

    /// Canonical encoding of the parsed `signed` value.
    pub fn canonical_bytes(&self) -> &[u8] {
        &self.canonical
    }

    /// The file exactly as received.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Checks the signatures against `authorization`.
    pub fn verify(&self, authorization: &Authorization<'_>) -> Result<()> {
        authorization.verify(&self.canonical, &self.signatures)
    }

    /// Metadata is expired once the reference time reaches its expiry.
    pub fn is_expired(&self, reference_time: DateTime<Utc>) -> bool {
        reference_time >= self.signed.expires()
    }
}

/// Root metadata: the trust anchor defining every top-level role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Root {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub consistent_snapshot: bool,
    pub keys: BTreeMap<KeyId, Key>,
    pub roles: BTreeMap<String, Role>,
}

impl Root {
    /// Key table and requirement the root assigns to `role`.
    pub fn authorization(&self, role: RoleType) -> Result<Authorization<'_>> {
        let requirement = self
            .roles
            .get(role.as_str())
            .ok_or_else(|| Error::malformed("root", format!("missing role '{role}'")))?;
        Ok(Authorization {
            role_name: role.as_str(),
            keys: &self.keys,
            role: requirement,
        })
    }
}

impl Payload for Root {
    const TYPE: &'static str = "root";

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn spec_version(&self) -> &str {
        &self.spec_version
    }

    fn validate(&self) -> std::result::Result<(), String> {
        for role in [
            RoleType::Root,
            RoleType::Timestamp,
            RoleType::Snapshot,
            RoleType::Targets,
        ] {
            let requirement = self
                .roles
                .get(role.as_str())
                .ok_or_else(|| format!("missing role '{role}'"))?;
            requirement
                .validate(role.as_str())
                .map_err(|err| err.to_string())?;
        }
        if let Some(extra) = self.roles.keys().find(|name| !RoleType::is_top_level(name)) {
            return Err(format!("unexpected role '{extra}' in root"));
        }
        Ok(())
    }
}

/// Expected version, and optionally length and hashes, of a metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<BTreeMap<String, String>>,
}

impl MetaFile {
    /// Checks `data` against the pinned length and hashes, when present.
    pub fn verify_content(&self, role: &str, data: &[u8]) -> Result<()> {
        if let Some(expected) = self.length {
            let actual = data.len() as u64;
            if actual != expected {
                return Err(Error::PinMismatch {
                    role: role.to_string(),
                    pin: Pin::Length { expected, actual },
                });
            }
        }
        if let Some(hashes) = &self.hashes {
            verify_hashes(role, hashes, data)?;
        }
        Ok(())
    }

    /// Checks the version of a loaded file against the pinned version.
    pub fn verify_version(&self, role: &str, actual: u64) -> Result<()> {
        if actual != self.version {
            return Err(Error::PinMismatch {
                role: role.to_string(),
                pin: Pin::Version {
                    expected: self.version,
                    actual,
                },
            });
        }
        Ok(())
    }

    fn validate(&self, name: &str) -> std::result::Result<(), String> {
        if self.version == 0 {
            return Err(format!("meta entry '{name}' has version 0"));
        }
        if matches!(&self.hashes, Some(hashes) if hashes.is_empty()) {
            return Err(format!("meta entry '{name}' has an empty hash table"));
        }
        Ok(())
    }
}

/// Checks every supported digest in `hashes` against `data`.
///
/// Unsupported algorithms are skipped; at least one supported digest must be present.
pub(crate) fn verify_hashes(
    role: &str,
    hashes: &BTreeMap<String, String>,
    data: &[u8],
) -> Result<()> {
    let mut checked = 0usize;
    for (algorithm, expected) in hashes {
        let actual = match algorithm.as_str() {
            "sha256" => hex::encode(Sha256::digest(data)),
            "sha512" => hex::encode(Sha512::digest(data)),
            other => {
                debug!(role, algorithm = other, "tuf: skipping unsupported hash algorithm");
                continue;
            }
        };
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(Error::PinMismatch {
                role: role.to_string(),
                pin: Pin::Hash {
                    algorithm: algorithm.clone(),
                },
            });
        }
        checked += 1;
    }
    if checked == 0 {
        return Err(Error::PinMismatch {
            role: role.to_string(),
            pin: Pin::NoSupportedHash,
        });
    }
    Ok(())
}

/// The `meta` table of a timestamp: a single pointer to the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampMeta {
    #[serde(rename = "snapshot.json")]
    pub snapshot: MetaFile,
}

/// Timestamp metadata: short-lived pointer to the current snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timestamp {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: TimestampMeta,
}

impl Payload for Timestamp {
    const TYPE: &'static str = "timestamp";

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn spec_version(&self) -> &str {
        &self.spec_version
    }

    fn validate(&self) -> std::result::Result<(), String> {
        self.meta.snapshot.validate("snapshot.json")
    }
}

/// Snapshot metadata: expected versions of every targets-family file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, MetaFile>,
}

impl Snapshot {
    /// Entry tracking `role`'s metadata file, if listed.
    pub fn meta_for(&self, role: &str) -> Option<&MetaFile> {
        self.meta.get(&format!("{role}.json"))
    }
}

impl Payload for Snapshot {
    const TYPE: &'static str = "snapshot";

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn spec_version(&self) -> &str {
        &self.spec_version
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !self.meta.contains_key("targets.json") {
            return Err("snapshot does not list targets.json".to_string());
        }
        for (name, entry) in &self.meta {
            entry.validate(name)?;
        }
        Ok(())
    }
}

/// Integrity information for one target file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFile {
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
}

/// Targets metadata: path table plus optional delegations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Targets {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,
}

impl Payload for Targets {
    const TYPE: &'static str = "targets";

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn spec_version(&self) -> &str {
        &self.spec_version
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if let Some((path, _)) = self.targets.iter().find(|(_, file)| file.hashes.is_empty()) {
            return Err(format!("target '{path}' has no hashes"));
        }
        match &self.delegations {
            Some(delegations) => delegations.validate(),
            None => Ok(()),
        }
    }
}

/// Delegations published by a targets role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegations {
    pub keys: BTreeMap<KeyId, Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<DelegatedRole>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succinct_roles: Option<SuccinctRoles>,
}

impl Delegations {
    /// Key table and requirement this delegator assigns to `name`.
    pub fn authorization_for(&self, name: &str) -> Option<Authorization<'_>> {
        if let Some(roles) = &self.roles {
            return roles
                .iter()
                .find(|role| role.name == name)
                .map(|role| Authorization {
                    role_name: role.name.as_str(),
                    keys: &self.keys,
                    role: &role.role,
                });
        }
        match &self.succinct_roles {
            Some(succinct) if succinct.is_bin_name(name) => Some(Authorization {
                role_name: succinct.name_prefix.as_str(),
                keys: &self.keys,
                role: &succinct.role,
            }),
            _ => None,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match (&self.roles, &self.succinct_roles) {
            (Some(roles), None) => {
                let mut seen = HashSet::new();
                for role in roles {
                    if RoleType::is_top_level(&role.name) {
                        return Err(format!("delegated role uses reserved name '{}'", role.name));
                    }
                    if !seen.insert(role.name.as_str()) {
                        return Err(format!("delegated role '{}' listed twice", role.name));
                    }
                    role.role.validate(&role.name).map_err(|err| err.to_string())?;
                    match (&role.paths, &role.path_hash_prefixes) {
                        (Some(_), None) | (None, Some(_)) => {}
                        _ => {
                            return Err(format!(
                                "delegated role '{}' must set exactly one of paths or path_hash_prefixes",
                                role.name
                            ))
                        }
                    }
                }
                Ok(())
            }
            (None, Some(succinct)) => succinct.validate(),
            _ => Err("delegations must set exactly one of roles or succinct_roles".to_string()),
        }
    }
}

/// A delegation entry naming a role and the paths it may describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatedRole {
    pub name: String,
    #[serde(flatten)]
    pub role: Role,
    #[serde(default)]
    pub terminating: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_hash_prefixes: Option<Vec<String>>,
}

/// Hash-bin delegation to `2^bit_length` roles sharing one key set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccinctRoles {
    #[serde(flatten)]
    pub role: Role,
    pub bit_length: u32,
    pub name_prefix: String,
}

impl SuccinctRoles {
    /// Number of hex digits in a bin suffix.
    fn suffix_len(&self) -> usize {
        self.bit_length.div_ceil(4) as usize
    }

    /// Name of the bin role responsible for `path`.
    pub fn role_for_path(&self, path: &str) -> String {
        let digest = Sha256::digest(path.as_bytes());
        let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        let bin = u64::from(prefix) >> (32 - self.bit_length);
        format!(
            "{}-{:0width$x}",
            self.name_prefix,
            bin,
            width = self.suffix_len()
        )
    }

    /// Returns `true` if `name` is one of this delegation's bin roles.
    pub fn is_bin_name(&self, name: &str) -> bool {
        let Some(suffix) = name
            .strip_prefix(self.name_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
        else {
            return false;
        };
        if suffix.len() != self.suffix_len() {
            return false;
        }
        match u64::from_str_radix(suffix, 16) {
            Ok(bin) => bin < (1u64 << self.bit_length),
            Err(_) => false,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !(1..=32).contains(&self.bit_length) {
            return Err(format!("succinct bit_length {} out of range", self.bit_length));
        }
        self.role
            .validate(&self.name_prefix)
            .map_err(|err| err.to_string())
    }
}
