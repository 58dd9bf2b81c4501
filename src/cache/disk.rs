//! Filesystem storage backend

use super::{write_atomic, StorageBackend};
use crate::core::fingerprint_str;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// Stores each record at `<root>/<namespace>/<hash of key>.bin`
#[derive(Debug, Clone)]
pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, namespace: &str, key: &str) -> PathBuf {
        // Item identities may contain separators, so file names are hashed
        self.root
            .join(namespace)
            .join(format!("{}.bin", fingerprint_str(key)))
    }
}

impl StorageBackend for DiskBackend {
    fn read(&self, namespace: &str, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.record_path(namespace, key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, namespace: &str, key: &str, bytes: &[u8]) -> io::Result<()> {
        write_atomic(&self.record_path(namespace, key), &[bytes])
    }
}
