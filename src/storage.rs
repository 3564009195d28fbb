//! Filesystem adapter.
//!
//! The core persists small JSON documents (configuration, transaction
//! records) through this trait. The only requirement on implementations is
//! atomic replace for a single file; concurrent readers are not supported.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::StorageError;

/// Minimal filesystem surface used by the core.
pub trait FilesystemAdapter {
    /// Read a whole file. `None` if it does not exist or cannot be read.
    fn read(&self, path: &str) -> Option<String>;

    /// Replace a file atomically with the given content.
    fn write(&self, path: &str, content: &str) -> Result<(), StorageError>;

    /// Remove a file. Removing a missing file is not an error.
    fn remove(&self, path: &str) -> Result<(), StorageError>;
}

/// On-disk adapter rooted at a directory. Writes go through a temp file and
/// a rename so a power cut never leaves a half-written document behind.
pub struct StdFilesystem {
    root: PathBuf,
}

impl StdFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Result<Rc<Self>, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Rc::new(Self { root }))
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl FilesystemAdapter for StdFilesystem {
    fn read(&self, path: &str) -> Option<String> {
        match fs::read_to_string(self.resolve(path)) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("read {} failed: {}", path, e);
                None
            }
        }
    }

    fn write(&self, path: &str, content: &str) -> Result<(), StorageError> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = target.with_extension("tmp");
        fs::write(&temp, content)?;
        fs::rename(&temp, &target)?;
        debug!("wrote {} ({} bytes)", path, content.len());
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.resolve(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory adapter. Cloning yields a handle onto the same backing map, so
/// a test can hold one handle across simulated power cycles of the engine.
#[derive(Clone, Default)]
pub struct MemFilesystem {
    files: Rc<RefCell<HashMap<String, String>>>,
}

impl MemFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.borrow().is_empty()
    }

    /// Drop everything, as if the medium were reformatted.
    pub fn clear(&self) {
        self.files.borrow_mut().clear();
    }
}

impl FilesystemAdapter for MemFilesystem {
    fn read(&self, path: &str) -> Option<String> {
        self.files.borrow().get(path).cloned()
    }

    fn write(&self, path: &str, content: &str) -> Result<(), StorageError> {
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        self.files.borrow_mut().remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn std_filesystem_round_trip() {
        let dir = tempdir().unwrap();
        let fs = StdFilesystem::new(dir.path()).unwrap();

        assert!(fs.read("config.jsn").is_none());
        fs.write("config.jsn", "{\"a\":1}").unwrap();
        assert_eq!(fs.read("config.jsn").unwrap(), "{\"a\":1}");

        fs.write("tx/1-0.jsn", "{}").unwrap();
        assert_eq!(fs.read("tx/1-0.jsn").unwrap(), "{}");

        fs.remove("config.jsn").unwrap();
        assert!(fs.read("config.jsn").is_none());
        // Removing twice is fine.
        fs.remove("config.jsn").unwrap();
    }

    #[test]
    fn mem_filesystem_shares_state_between_handles() {
        let a = MemFilesystem::new();
        let b = a.clone();

        a.write("x", "1").unwrap();
        assert_eq!(b.read("x").unwrap(), "1");

        b.remove("x").unwrap();
        assert!(a.read("x").is_none());
    }
}
