//! Keys, role authorizations, and threshold signature verification.
//!
//! A role is trusted only when enough *distinct* authorized keys produced a
//! valid signature over the canonical payload. Unknown key ids are ignored,
//! repeated signatures from one key id count once, and two key ids that
//! resolve to the same public key material also count once.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use ed25519_dalek::{Signature as Ed25519Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::canonical;
use crate::error::{Error, Result};

/// Hex-encoded key identifier (SHA-256 of the canonical key object).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Wraps an identifier string as-is.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signature schemes this client can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ed25519,
    Unsupported,
}

/// Public key material as published in root or delegation key tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub keytype: String,
    pub scheme: String,
    pub keyval: KeyValue,
    /// Fields this client does not interpret (kept for key id computation).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The `keyval` object of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Hex-encoded public key.
    pub public: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Key {
    /// Builds an Ed25519 key from raw public key bytes.
    pub fn ed25519(public: [u8; 32]) -> Self {
        Self {
            keytype: "ed25519".to_string(),
            scheme: "ed25519".to_string(),
            keyval: KeyValue {
                public: hex::encode(public),
                extra: BTreeMap::new(),
            },
            extra: BTreeMap::new(),
        }
    }

    /// Computes the content-derived identifier of this key.
    pub fn key_id(&self) -> std::result::Result<KeyId, serde_json::Error> {
        let encoded = canonical::encode(self)?;
        Ok(KeyId(hex::encode(Sha256::digest(&encoded))))
    }

    /// Resolves the signing scheme from the `keytype`/`scheme` pair.
    pub fn scheme(&self) -> Scheme {
        match (self.keytype.as_str(), self.scheme.as_str()) {
            ("ed25519", "ed25519") => Scheme::Ed25519,
            _ => Scheme::Unsupported,
        }
    }

    /// Verifies `signature` over `message`; any decoding failure counts as invalid.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self.scheme() {
            Scheme::Ed25519 => {
                let Ok(public) = hex::decode(&self.keyval.public) else {
                    return false;
                };
                let Ok(public) = <[u8; 32]>::try_from(public.as_slice()) else {
                    return false;
                };
                let Ok(key) = VerifyingKey::from_bytes(&public) else {
                    return false;
                };
                let Ok(signature) = Ed25519Signature::from_slice(signature) else {
                    return false;
                };
                key.verify_strict(message, &signature).is_ok()
            }
            Scheme::Unsupported => {
                warn!(
                    keytype = %self.keytype,
                    scheme = %self.scheme,
                    "tuf: ignoring signature from key with unsupported scheme"
                );
                false
            }
        }
    }

    /// Normalised public material used to detect aliased key ids.
    fn material(&self) -> (String, String) {
        (self.keytype.clone(), self.keyval.public.to_ascii_lowercase())
    }
}

/// A single signature entry of a signed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: KeyId,
    /// Hex-encoded signature bytes.
    pub sig: String,
}

impl Signature {
    /// Decodes the hex signature; `None` when malformed.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        hex::decode(&self.sig).ok()
    }
}

/// Key ids authorized for a role and the number of them required to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub keyids: Vec<KeyId>,
    pub threshold: u32,
}

impl Role {
    /// Rejects unsatisfiable or ambiguous role definitions.
    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        if self.threshold == 0 {
            return Err(Error::malformed(name, "role threshold must be at least 1"));
        }
        let distinct: HashSet<&KeyId> = self.keyids.iter().collect();
        if distinct.len() != self.keyids.len() {
            return Err(Error::malformed(name, "role lists a key id more than once"));
        }
        if (distinct.len() as u64) < u64::from(self.threshold) {
            return Err(Error::malformed(
                name,
                format!(
                    "threshold {} exceeds the {} authorized keys",
                    self.threshold,
                    distinct.len()
                ),
            ));
        }
        Ok(())
    }
}

/// Counts distinct authorized keys with a valid signature over `payload`.
pub fn count_valid_signatures(
    payload: &[u8],
    signatures: &[Signature],
    keys: &BTreeMap<KeyId, Key>,
    role: &Role,
) -> usize {
    let authorized: HashSet<&KeyId> = role.keyids.iter().collect();
    let mut counted_ids: HashSet<&KeyId> = HashSet::new();
    let mut counted_material = HashSet::new();
    for signature in signatures {
        if !authorized.contains(&signature.keyid) || counted_ids.contains(&signature.keyid) {
            continue;
        }
        let Some(key) = keys.get(&signature.keyid) else {
            debug!(keyid = %signature.keyid, "tuf: authorized key id missing from key table");
            continue;
        };
        let Some(bytes) = signature.bytes() else {
            debug!(keyid = %signature.keyid, "tuf: signature is not valid hex");
            continue;
        };
        if !key.verify(payload, &bytes) {
            debug!(keyid = %signature.keyid, "tuf: signature did not verify");
            continue;
        }
        if !counted_material.insert(key.material()) {
            debug!(keyid = %signature.keyid, "tuf: key material already counted under another id");
            continue;
        }
        counted_ids.insert(&signature.keyid);
    }
    counted_ids.len()
}

/// Returns `true` when the role's threshold of distinct valid signatures is met.
///
/// A role with threshold 0 or no keys is never satisfied.
pub fn verify_threshold(
    payload: &[u8],
    signatures: &[Signature],
    keys: &BTreeMap<KeyId, Key>,
    role: &Role,
) -> bool {
    if role.threshold == 0 || role.keyids.is_empty() {
        return false;
    }
    count_valid_signatures(payload, signatures, keys, role) >= role.threshold as usize
}

/// Key table plus role requirement for one named role, as issued by a trusted delegator.
#[derive(Debug, Clone, Copy)]
pub struct Authorization<'a> {
    pub role_name: &'a str,
    pub keys: &'a BTreeMap<KeyId, Key>,
    pub role: &'a Role,
}

impl<'a> Authorization<'a> {
    /// Checks the signatures and maps a shortfall to [`Error::SignatureThreshold`].
    pub fn verify(&self, payload: &[u8], signatures: &[Signature]) -> Result<()> {
        let valid = count_valid_signatures(payload, signatures, self.keys, self.role);
        if self.role.threshold == 0
            || self.role.keyids.is_empty()
            || valid < self.role.threshold as usize
        {
            return Err(Error::SignatureThreshold {
                role: self.role_name.to_string(),
                valid,
                threshold: self.role.threshold,
            });
        }
        Ok(())
    }
}
