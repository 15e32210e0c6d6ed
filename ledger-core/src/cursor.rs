//! Opaque pagination cursors
//!
//! A cursor is the serialized continuation state of a transaction-log read,
//! sealed with AES-256-GCM and base64url-encoded without padding. Sealing
//! gives both integrity (a tampered cursor is rejected) and confidentiality
//! (user ids and time bounds are not enumerable by clients). Callers must
//! treat cursors as opaque strings.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// 256-bit key compiled into the binary. A production deployment would load
// this from configuration instead.
const CURSOR_KEY: [u8; 32] = [
    0x8d, 0x4f, 0x95, 0x48, 0x28, 0x5b, 0x83, 0xae, 0x02, 0x1e, 0xbe, 0x9a, 0xb4, 0x37, 0x62,
    0x57, 0x70, 0x73, 0x41, 0x96, 0x1a, 0x05, 0x79, 0x2d, 0xd4, 0x51, 0x01, 0xbe, 0xaa, 0xc7,
    0x5a, 0xfa,
];

const NONCE_LEN: usize = 12;

/// Continuation state of a transaction-log read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCursor {
    /// User whose log is being paged
    pub user_id: String,
    /// Lower timestamp bound, if the original request had one
    pub min_ts: Option<DateTime<Utc>>,
    /// Upper timestamp bound, if the original request had one
    pub max_ts: Option<DateTime<Utc>>,
    /// The next page contains ids at or below this one
    pub before_id: i64,
}

/// Seal a cursor into an opaque string. `None` only on serialization or
/// encryption failure, which does not happen for well-formed records.
pub fn encode(cursor: &TransactionCursor) -> Option<String> {
    let plain = bincode::serialize(cursor).ok()?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&CURSOR_KEY));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher.encrypt(&nonce, plain.as_slice()).ok()?;

    let mut packed = Vec::with_capacity(NONCE_LEN + sealed.len());
    packed.extend_from_slice(&nonce);
    packed.extend_from_slice(&sealed);

    Some(URL_SAFE_NO_PAD.encode(packed))
}

/// Open a sealed cursor. Any format, integrity or deserialization failure
/// yields `None` ("bad cursor").
pub fn decode(input: &str) -> Option<TransactionCursor> {
    let packed = URL_SAFE_NO_PAD.decode(input).ok()?;
    if packed.len() < NONCE_LEN {
        return None;
    }
    let (nonce, sealed) = packed.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&CURSOR_KEY));
    let plain = cipher.decrypt(Nonce::from_slice(nonce), sealed).ok()?;

    bincode::deserialize(&plain).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cursor() -> TransactionCursor {
        TransactionCursor {
            user_id: "mehmet".to_string(),
            min_ts: DateTime::from_timestamp(1_668_963_843, 0),
            max_ts: None,
            before_id: 2_188_749_003_104_256,
        }
    }

    #[test]
    fn test_round_trip() {
        let cursor = sample_cursor();
        let sealed = encode(&cursor).unwrap();
        assert_eq!(decode(&sealed), Some(cursor));
    }

    #[test]
    fn test_cursors_are_opaque_and_unique() {
        let cursor = sample_cursor();
        let a = encode(&cursor).unwrap();
        let b = encode(&cursor).unwrap();
        // fresh nonce per encode; equal records never produce equal strings
        assert_ne!(a, b);
        assert!(!a.contains("mehmet"));
    }

    #[test]
    fn test_tampered_cursor_is_rejected() {
        let sealed = encode(&sample_cursor()).unwrap();
        let mut bytes: Vec<char> = sealed.chars().collect();
        bytes[0] = if bytes[0] == 'A' { 'B' } else { 'A' };
        let tampered: String = bytes.into_iter().collect();
        assert_eq!(decode(&tampered), None);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(decode(""), None);
        assert_eq!(decode("not base64 at all!!"), None);
        assert_eq!(decode("YWJjZA"), None);
        let random = URL_SAFE_NO_PAD.encode([0u8; 256]);
        assert_eq!(decode(&random), None);
    }
}
