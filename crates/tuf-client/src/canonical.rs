//! Canonical JSON encoding for signature verification.
//!
//! Repositories sign the OLPC canonical form of the `signed` object, so two
//! documents that differ only in key order or whitespace produce identical
//! bytes here. Callers must encode the exact value they parsed; see
//! [`crate::metadata::Envelope`].

use olpc_cjson::CanonicalFormatter;
use serde::Serialize;

/// Encodes `payload` as canonical JSON (sorted keys, no insignificant whitespace).
///
/// Floating point numbers are rejected by the formatter, which surfaces as a
/// serialization error.
pub fn encode<T>(payload: &T) -> Result<Vec<u8>, serde_json::Error>
where
    T: Serialize + ?Sized,
{
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, CanonicalFormatter::new());
    payload.serialize(&mut ser)?;
    Ok(out)
}
