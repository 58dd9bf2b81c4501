//! Configuration fingerprints
//!
//! A fingerprint is a short hex identifier derived from the canonical
//! description of a configuration. It names cache directories and is stored
//! next to persisted artifacts so a stale artifact is never reused.

use crate::core::{PhowError, Result};
use rustc_hash::FxHasher;
use serde::Serialize;
use std::hash::Hasher;

/// 128-bit fingerprint of an arbitrary byte payload, as 32 hex digits
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut high = FxHasher::default();
    high.write_u8(0x9e);
    high.write(bytes);

    let mut low = FxHasher::default();
    low.write_u8(0x37);
    low.write_usize(bytes.len());
    low.write(bytes);

    format!("{:016x}{:016x}", high.finish(), low.finish())
}

/// Fingerprint of a canonical configuration string
pub fn fingerprint_str(canonical: &str) -> String {
    fingerprint_bytes(canonical.as_bytes())
}

/// Canonical JSON description of a serializable configuration
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| PhowError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        let a = fingerprint_str("k=50;levels=[1,2]");
        let b = fingerprint_str("k=50;levels=[1,2]");
        let c = fingerprint_str("k=60;levels=[1,2]");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_canonical_json() {
        #[derive(Serialize)]
        struct Params {
            k: usize,
            step: usize,
        }
        let json = canonical_json(&Params { k: 300, step: 3 }).unwrap();
        assert_eq!(json, r#"{"k":300,"step":3}"#);
    }
}
