//! Deterministic signing keys and the file builders that depend only on
//! them. Compiled into the unit tests through `test_support` and into the
//! integration tests through `tests/common`; each includer provides
//! `canonical`, `Key`, `KeyId` and `Signature`.

use ed25519_dalek::{Signer, SigningKey};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{canonical, Key, KeyId, Signature};

/// Ed25519 key derived from a one-byte seed.
pub struct TestKey {
    signing: SigningKey,
}

impl TestKey {
    pub fn new(seed: u8) -> Self {
        Self {
            signing: SigningKey::from_bytes(&[seed; 32]),
        }
    }

    pub fn public(&self) -> Key {
        Key::ed25519(self.signing.verifying_key().to_bytes())
    }

    pub fn id(&self) -> KeyId {
        self.public().key_id().expect("key id")
    }
}

/// Signs `payload` with `key`, using the key's content-derived id.
pub fn sign(key: &TestKey, payload: &[u8]) -> Signature {
    Signature {
        keyid: key.id(),
        sig: hex::encode(key.signing.sign(payload).to_bytes()),
    }
}

/// Wraps `signed` in an envelope signed by every key in `keys`.
pub fn signed_file(signed: &Value, keys: &[&TestKey]) -> Vec<u8> {
    let payload = canonical::encode(signed).expect("canonical payload");
    let signatures: Vec<Signature> = keys.iter().map(|key| sign(key, &payload)).collect();
    serde_json::to_vec(&json!({ "signed": signed, "signatures": signatures })).expect("envelope")
}

/// Pin entry for `bytes` at `version`, with length and sha256.
pub fn meta_entry(version: u64, bytes: &[u8]) -> Value {
    json!({
        "version": version,
        "length": bytes.len(),
        "hashes": { "sha256": hex::encode(Sha256::digest(bytes)) },
    })
}

/// Target table entry describing `content`.
pub fn target_entry(content: &[u8]) -> Value {
    json!({
        "length": content.len(),
        "hashes": { "sha256": hex::encode(Sha256::digest(content)) },
    })
}
