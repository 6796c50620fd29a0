//! Persistent storage seam.
//!
//! The store itself never touches the filesystem for object state; it talks
//! to a `Storage` implementation. The platform adaptation that performs real
//! secure-storage I/O lives behind this trait. Two reference backends ship
//! with the crate: an in-memory map for tests and a JSON-file-per-object
//! directory layout.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// The object classes a backend must keep apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Key,
    Digest,
    /// Store-level state: module id, provisioning secret.
    Meta,
}

impl ObjectKind {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Key => "keys",
            Self::Digest => "digests",
            Self::Meta => "meta",
        }
    }
}

/// A persistence backend. Implementations must be durable and atomic at the
/// granularity of one record; the registry serialises all calls.
pub trait Storage: Send {
    /// Write or overwrite one record.
    fn put(&mut self, kind: ObjectKind, id: &str, record: &[u8]) -> std::io::Result<()>;

    /// Remove one record. Removing an absent record is not an error.
    fn remove(&mut self, kind: ObjectKind, id: &str) -> std::io::Result<()>;

    /// Load every record of one kind.
    fn load_all(&self, kind: ObjectKind) -> std::io::Result<Vec<(String, Vec<u8>)>>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// A volatile backend. Saved objects survive for the life of the process
/// only; useful for tests and for deployments that disable persistence.
#[derive(Default)]
pub struct MemoryStorage {
    records: HashMap<(ObjectKind, String), Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn put(&mut self, kind: ObjectKind, id: &str, record: &[u8]) -> std::io::Result<()> {
        self.records.insert((kind, id.to_string()), record.to_vec());
        Ok(())
    }

    fn remove(&mut self, kind: ObjectKind, id: &str) -> std::io::Result<()> {
        self.records.remove(&(kind, id.to_string()));
        Ok(())
    }

    fn load_all(&self, kind: ObjectKind) -> std::io::Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .records
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, id), record)| (id.clone(), record.clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// One file per record under `<root>/<kind>/<id>`. Identifier charsets are
/// restricted upstream, so ids are safe as file names.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open or create the backing directory tree.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        for kind in [ObjectKind::Key, ObjectKind::Digest, ObjectKind::Meta] {
            fs::create_dir_all(root.join(kind.dir_name()))?;
        }
        Ok(Self { root })
    }

    fn path_for(&self, kind: ObjectKind, id: &str) -> PathBuf {
        self.root.join(kind.dir_name()).join(id)
    }
}

impl Storage for FileStorage {
    fn put(&mut self, kind: ObjectKind, id: &str, record: &[u8]) -> std::io::Result<()> {
        // Write to a temp name and rename so a crash never leaves a torn
        // record. Ids contain dots, so append rather than swap an extension.
        let path = self.path_for(kind, id);
        let tmp = path.with_file_name(format!("{id}.tmp"));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(record)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)
    }

    fn remove(&mut self, kind: ObjectKind, id: &str) -> std::io::Result<()> {
        match fs::remove_file(self.path_for(kind, id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn load_all(&self, kind: ObjectKind) -> std::io::Result<Vec<(String, Vec<u8>)>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.root.join(kind.dir_name()))? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name.ends_with(".tmp") {
                continue;
            }
            records.push((name, fs::read(entry.path())?));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip() {
        let mut storage = MemoryStorage::new();
        storage.put(ObjectKind::Key, "app.k1", b"record").unwrap();
        storage.put(ObjectKind::Digest, "app.k1", b"other").unwrap();

        let keys = storage.load_all(ObjectKind::Key).unwrap();
        assert_eq!(keys, vec![("app.k1".to_string(), b"record".to_vec())]);

        storage.remove(ObjectKind::Key, "app.k1").unwrap();
        assert!(storage.load_all(ObjectKind::Key).unwrap().is_empty());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.put(ObjectKind::Key, "app.k1", b"record").unwrap();
        storage.put(ObjectKind::Key, "app.k1", b"updated").unwrap();

        let keys = storage.load_all(ObjectKind::Key).unwrap();
        assert_eq!(keys, vec![("app.k1".to_string(), b"updated".to_vec())]);

        storage.remove(ObjectKind::Key, "app.k1").unwrap();
        storage.remove(ObjectKind::Key, "app.k1").unwrap();
        assert!(storage.load_all(ObjectKind::Key).unwrap().is_empty());
    }
}
