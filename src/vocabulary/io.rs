//! Vocabulary persistence
//!
//! The on-disk format is a short magic header followed by a bincode payload
//! with K, the descriptor dimensionality, the centroid values, the distance
//! metric and the training fingerprint. Any failure to read or decode is a
//! `CacheIo` error so callers can fall back to retraining. Transient io
//! failures are retried once, as for feature records.

use super::Vocabulary;
use crate::cache::{with_retry, write_atomic};
use crate::core::{PhowError, Result};
use log::debug;
use std::fs;
use std::path::Path;

const MAGIC: &[u8; 8] = b"PHOWVOC1";

/// Write a vocabulary, replacing any existing file atomically
pub fn write_vocabulary<P: AsRef<Path>>(path: P, vocabulary: &Vocabulary) -> Result<()> {
    let path = path.as_ref();
    let payload = bincode::serialize(vocabulary)?;
    with_retry(|| write_atomic(path, &[&MAGIC[..], &payload[..]]))
        .map_err(|e| PhowError::CacheIo(format!("cannot write {}: {e}", path.display())))?;

    debug!("Wrote vocabulary ({} x {}) to {}", vocabulary.k(), vocabulary.dim(), path.display());
    Ok(())
}

/// Read a vocabulary written by [`write_vocabulary`]
pub fn read_vocabulary<P: AsRef<Path>>(path: P) -> Result<Vocabulary> {
    let path = path.as_ref();
    let bytes = with_retry(|| fs::read(path))
        .map_err(|e| PhowError::CacheIo(format!("cannot read {}: {e}", path.display())))?;

    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return Err(PhowError::CacheIo(format!(
            "{} is not a vocabulary file",
            path.display()
        )));
    }

    let vocabulary: Vocabulary = bincode::deserialize(&bytes[MAGIC.len()..])
        .map_err(|e| PhowError::CacheIo(format!("corrupt vocabulary {}: {e}", path.display())))?;

    // Re-validate the decoded shape
    let centroids: Vec<Vec<f32>> = (0..vocabulary.k())
        .map(|i| vocabulary.centroid(i).to_vec())
        .collect();
    let rebuilt = Vocabulary::new(centroids, vocabulary.metric())
        .map_err(|e| PhowError::CacheIo(format!("invalid vocabulary {}: {e}", path.display())))?;

    Ok(match vocabulary.training_fingerprint() {
        Some(fp) => rebuilt.with_training_fingerprint(fp),
        None => rebuilt,
    })
}
