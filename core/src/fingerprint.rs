//! Content fingerprints used for drift detection.
//!
//! A fingerprint is the lowercase hex SHA-1 of the decoded payload. The
//! empty string is reserved for "no valid fingerprint": it never equals a
//! real digest, so an undecodable payload always reads as "not up to date".

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use sha1::{Digest, Sha1};

/// Fingerprint of a base64 payload, or `""` if it does not decode.
pub fn fingerprint(payload_b64: &str) -> String {
    match decode_payload(payload_b64) {
        Ok(bytes) => digest(&bytes),
        Err(_) => String::new(),
    }
}

pub fn decode_payload(payload_b64: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(payload_b64)
}

/// Lowercase hex digest of raw bytes.
pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha1::digest(bytes))
}

/// Fingerprint of a structured spec, over its canonical JSON form.
///
/// Models use ordered maps, so equal values always serialize identically.
pub fn fingerprint_json<T: Serialize>(value: &T) -> String {
    match serde_json::to_vec(value) {
        Ok(bytes) => digest(&bytes),
        Err(_) => String::new(),
    }
}
