//! Feature cache
//!
//! [`CachingFeatureStore`] wraps a deterministic [`FeatureExtractor`] and a
//! [`StorageBackend`]. Records are keyed by the extractor's configuration
//! fingerprint and the item identity, and carry both the full canonical
//! configuration and the identity so a lookup can never return a vector
//! computed under different parameters. Unreadable, corrupt or mismatched
//! records are logged and recomputed.

mod disk;
mod memory;

pub use self::disk::DiskBackend;
pub use self::memory::MemoryBackend;

use crate::core::{fingerprint_str, FeatureExtractor, FeatureVector, Identified, PhowError, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Durable key-value storage for cache records
///
/// `namespace` is the configuration fingerprint, `key` the item identity.
/// Implementations must make `write` atomic: a concurrent or interrupted
/// write never leaves a partial record visible to `read`.
pub trait StorageBackend: Send + Sync {
    /// Stored bytes, or `None` if the key was never written
    fn read(&self, namespace: &str, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Store bytes, replacing any previous value
    fn write(&self, namespace: &str, key: &str, bytes: &[u8]) -> io::Result<()>;

    /// Number of stored records, when cheap to know
    fn len(&self) -> Option<usize> {
        None
    }
}

impl<B: StorageBackend + ?Sized> StorageBackend for Box<B> {
    fn read(&self, namespace: &str, key: &str) -> io::Result<Option<Vec<u8>>> {
        (**self).read(namespace, key)
    }

    fn write(&self, namespace: &str, key: &str, bytes: &[u8]) -> io::Result<()> {
        (**self).write(namespace, key, bytes)
    }

    fn len(&self) -> Option<usize> {
        (**self).len()
    }
}

impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    fn read(&self, namespace: &str, key: &str) -> io::Result<Option<Vec<u8>>> {
        (**self).read(namespace, key)
    }

    fn write(&self, namespace: &str, key: &str, bytes: &[u8]) -> io::Result<()> {
        (**self).write(namespace, key, bytes)
    }

    fn len(&self) -> Option<usize> {
        (**self).len()
    }
}

/// Write `parts` to `path` through a temporary file in the same directory,
/// then rename over the destination
pub(crate) fn write_atomic(path: &Path, parts: &[&[u8]]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    for part in parts {
        tmp.write_all(part)?;
    }
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

/// Run a storage call, retrying once on a transient failure
pub(crate) fn with_retry<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    match op() {
        Err(e) if is_transient(&e) => {
            debug!("Transient storage failure, retrying: {e}");
            op()
        }
        other => other,
    }
}

/// One persisted cache record
#[derive(Debug, Serialize, Deserialize)]
struct CachedRecord {
    configuration: String,
    identity: String,
    vector: FeatureVector,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Calls into the wrapped extractor
    pub extractions: u64,
    /// Records that could not be persisted
    pub write_failures: u64,
    /// Stored records, when the backend reports it
    pub size: Option<usize>,
}

impl CacheStats {
    /// Get cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Read-through feature cache
pub struct CachingFeatureStore<E, B> {
    extractor: E,
    backend: B,
    configuration: String,
    fingerprint: String,
    hits: AtomicU64,
    misses: AtomicU64,
    extractions: AtomicU64,
    write_failures: AtomicU64,
}

impl<E, B> CachingFeatureStore<E, B>
where
    E: FeatureExtractor,
    B: StorageBackend,
{
    pub fn new(extractor: E, backend: B) -> Self {
        let configuration = extractor.configuration();
        let fingerprint = fingerprint_str(&configuration);
        debug!("Feature cache fingerprint {fingerprint}");
        Self {
            extractor,
            backend,
            configuration,
            fingerprint,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            extractions: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    /// Fingerprint of the wrapped extractor's configuration
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Feature vector for `item`, computing and persisting it on a miss
    ///
    /// Storage failures degrade to recomputation. Only extractor errors
    /// propagate.
    pub fn get(&self, item: &E::Item) -> Result<FeatureVector> {
        let identity = item.identity();

        match self.lookup(&identity) {
            Ok(Some(vector)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for {identity}");
                return Ok(vector);
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring cached features for {identity}: {e}"),
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        self.extractions.fetch_add(1, Ordering::Relaxed);
        let vector = self.extractor.extract(item)?;

        if let Err(e) = self.store(&identity, &vector) {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Could not cache features for {identity}: {e}");
        }
        Ok(vector)
    }

    fn lookup(&self, identity: &str) -> Result<Option<FeatureVector>> {
        let bytes = with_retry(|| self.backend.read(&self.fingerprint, identity))
            .map_err(|e| PhowError::CacheIo(e.to_string()))?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let record: CachedRecord = bincode::deserialize(&bytes)
            .map_err(|e| PhowError::CacheIo(format!("corrupt record: {e}")))?;

        if record.configuration != self.configuration {
            return Err(PhowError::ConfigurationMismatch {
                expected: self.fingerprint.clone(),
                found: fingerprint_str(&record.configuration),
            });
        }
        if record.identity != identity {
            return Err(PhowError::CacheIo(format!(
                "record belongs to {}",
                record.identity
            )));
        }
        if let Some(dim) = self.extractor.dimension() {
            if record.vector.len() != dim {
                return Err(PhowError::DimensionMismatch {
                    expected: dim,
                    actual: record.vector.len(),
                });
            }
        }
        Ok(Some(record.vector))
    }

    fn store(&self, identity: &str, vector: &FeatureVector) -> Result<()> {
        let record = CachedRecord {
            configuration: self.configuration.clone(),
            identity: identity.to_string(),
            vector: vector.clone(),
        };
        let bytes = bincode::serialize(&record)?;
        with_retry(|| self.backend.write(&self.fingerprint, identity, &bytes))
            .map_err(|e| PhowError::CacheIo(e.to_string()))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            extractions: self.extractions.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            size: self.backend.len(),
        }
    }
}
