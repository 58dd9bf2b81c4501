//! In-memory LRU storage backend

use super::StorageBackend;
use lru::LruCache;
use parking_lot::Mutex;
use std::io;
use std::num::NonZeroUsize;

/// Cache key for a record: configuration namespace plus item identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    namespace: String,
    key: String,
}

impl RecordKey {
    fn new(namespace: &str, key: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
        }
    }
}

/// Bounded in-process backend; the least recently used record is evicted
/// once `capacity` records are held
pub struct MemoryBackend {
    records: Mutex<LruCache<RecordKey, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create a backend holding at most `capacity` records (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            records: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.lock().cap().get()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, namespace: &str, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .records
            .lock()
            .get(&RecordKey::new(namespace, key))
            .cloned())
    }

    fn write(&self, namespace: &str, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.records
            .lock()
            .put(RecordKey::new(namespace, key), bytes.to_vec());
        Ok(())
    }

    fn len(&self) -> Option<usize> {
        Some(self.records.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_eviction() {
        let backend = MemoryBackend::new(2);

        backend.write("ns", "a", b"1").unwrap();
        backend.write("ns", "b", b"2").unwrap();
        backend.write("ns", "c", b"3").unwrap(); // Should evict a

        assert_eq!(backend.read("ns", "a").unwrap(), None);
        assert_eq!(backend.read("ns", "b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(backend.read("ns", "c").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let backend = MemoryBackend::new(0);
        assert_eq!(backend.capacity(), 1);
    }

    #[test]
    fn test_clear() {
        let backend = MemoryBackend::new(4);
        backend.write("ns", "a", b"1").unwrap();
        backend.clear();
        assert_eq!(backend.len(), Some(0));
        assert_eq!(backend.read("ns", "a").unwrap(), None);
    }
}
