//! Key-version metadata: which KEK alias wrapped a DEK at a given version.
//!
//! Decrypt routes an unwrap to the correct KeyService binding by resolving
//! the record's key version here. Versions are allocated monotonically and
//! gap-free; a registered row is immutable.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default on-disk location: `.encx/metadata.db`.
pub const DEFAULT_DB_PATH: &str = ".encx";
pub const DEFAULT_DB_FILENAME: &str = "metadata.db";

// ---------------------------------------------------------------------------
// Records and trait
// ---------------------------------------------------------------------------

/// One immutable key-version row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersionRecord {
    /// Monotonically assigned, starting at 1.
    pub key_version: u32,
    /// The alias under which wrapping occurred.
    pub kek_alias: String,
    /// e.g. "AES-256-GCM".
    pub algorithm: String,
    /// Wall-clock registration time.
    pub created_at: DateTime<Utc>,
}

/// Persist and resolve key-version rows.
///
/// `register` must serialize so that versions are unique and gap-free;
/// `resolve_version` may run concurrently with registration.
pub trait MetadataStore: Send + Sync {
    /// Allocate the next version for `kek_alias`. Atomic and monotonic.
    fn register(&self, kek_alias: &str, algorithm: &str) -> Result<u32, Error>;

    /// Look up a version. Fails `VERSION_UNKNOWN` if absent.
    fn resolve_version(&self, version: u32) -> Result<KeyVersionRecord, Error>;

    /// Highest version registered for `kek_alias`, or 0 when none.
    fn latest_version(&self, kek_alias: &str) -> Result<u32, Error>;
}

fn validate_register_args(kek_alias: &str, algorithm: &str) -> Result<(), Error> {
    if kek_alias.is_empty() {
        return Err(Error::invalid_arg("kek_alias must not be empty"));
    }
    if algorithm.is_empty() {
        return Err(Error::invalid_arg("algorithm must not be empty"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-memory store for tests and ephemeral engines.
pub struct InMemoryMetadataStore {
    rows: RwLock<Vec<KeyVersionRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetadataStore {
    /// Every registered row, ordered by version. Diagnostic surface; the
    /// trait contract stays register/resolve/latest.
    pub fn rows(&self) -> Vec<KeyVersionRecord> {
        let mut rows = self.rows.read().unwrap().clone();
        rows.sort_by_key(|r| r.key_version);
        rows
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn register(&self, kek_alias: &str, algorithm: &str) -> Result<u32, Error> {
        validate_register_args(kek_alias, algorithm)?;
        let mut rows = self.rows.write().unwrap();
        let version = rows.len() as u32 + 1;
        rows.push(KeyVersionRecord {
            key_version: version,
            kek_alias: kek_alias.to_string(),
            algorithm: algorithm.to_string(),
            created_at: Utc::now(),
        });
        Ok(version)
    }

    fn resolve_version(&self, version: u32) -> Result<KeyVersionRecord, Error> {
        let rows = self.rows.read().unwrap();
        rows.iter()
            .find(|r| r.key_version == version)
            .cloned()
            .ok_or_else(|| Error::version_unknown(version))
    }

    fn latest_version(&self, kek_alias: &str) -> Result<u32, Error> {
        let rows = self.rows.read().unwrap();
        Ok(rows
            .iter()
            .filter(|r| r.kek_alias == kek_alias)
            .map(|r| r.key_version)
            .max()
            .unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// Serialized shape of the single-file database.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataFile {
    rows: Vec<KeyVersionRecord>,
}

/// Single-file JSON store at `${db_path}/${db_filename}`.
///
/// The directory is auto-created mode `0700`, the file written mode `0644`.
/// Writes go through a temp file + rename so a crash never leaves a torn
/// database. Registration holds a single-writer lock; resolution reads an
/// in-memory index.
pub struct FileMetadataStore {
    path: PathBuf,
    // Guards the allocate-then-persist sequence; also the write path to the index.
    write_lock: Mutex<()>,
    index: RwLock<HashMap<u32, KeyVersionRecord>>,
}

impl FileMetadataStore {
    /// Open (or create) the store under the default `.encx/metadata.db`.
    pub fn open_default() -> Result<Self, Error> {
        Self::open(DEFAULT_DB_PATH, DEFAULT_DB_FILENAME)
    }

    /// Open (or create) the store at `${dir}/${filename}`.
    pub fn open(dir: impl AsRef<Path>, filename: &str) -> Result<Self, Error> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| Error::io_failure(format!("create {}: {}", dir.display(), e)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
                .map_err(|e| Error::io_failure(format!("chmod {}: {}", dir.display(), e)))?;
        }

        let path = dir.join(filename);
        let rows = if path.exists() {
            let data = fs::read_to_string(&path)
                .map_err(|e| Error::io_failure(format!("read {}: {}", path.display(), e)))?;
            serde_json::from_str::<MetadataFile>(&data)
                .map_err(|e| Error::io_failure(format!("parse {}: {}", path.display(), e)))?
                .rows
        } else {
            Vec::new()
        };

        let index = rows
            .into_iter()
            .map(|r| (r.key_version, r))
            .collect::<HashMap<_, _>>();

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            index: RwLock::new(index),
        })
    }

    /// The on-disk location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every registered row, ordered by version. Diagnostic surface.
    pub fn rows(&self) -> Vec<KeyVersionRecord> {
        let mut rows: Vec<KeyVersionRecord> =
            self.index.read().unwrap().values().cloned().collect();
        rows.sort_by_key(|r| r.key_version);
        rows
    }

    fn persist(&self, rows: Vec<KeyVersionRecord>) -> Result<(), Error> {
        let mut rows = rows;
        rows.sort_by_key(|r| r.key_version);
        let json = serde_json::to_string_pretty(&MetadataFile { rows })
            .map_err(|e| Error::io_failure(format!("serialize metadata: {}", e)))?;

        // Atomic write: write to temp, then rename.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &json)
            .map_err(|e| Error::io_failure(format!("write {}: {}", tmp.display(), e)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o644))
                .map_err(|e| Error::io_failure(format!("chmod {}: {}", tmp.display(), e)))?;
        }
        fs::rename(&tmp, &self.path)
            .map_err(|e| Error::io_failure(format!("rename {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

impl MetadataStore for FileMetadataStore {
    fn register(&self, kek_alias: &str, algorithm: &str) -> Result<u32, Error> {
        validate_register_args(kek_alias, algorithm)?;
        let _writer = self.write_lock.lock().unwrap();

        let version = {
            let index = self.index.read().unwrap();
            index.keys().max().copied().unwrap_or(0) + 1
        };
        let record = KeyVersionRecord {
            key_version: version,
            kek_alias: kek_alias.to_string(),
            algorithm: algorithm.to_string(),
            created_at: Utc::now(),
        };

        // Persist before exposing the row: a version must never be observed
        // without a durable backing entry.
        let mut rows: Vec<KeyVersionRecord> =
            self.index.read().unwrap().values().cloned().collect();
        rows.push(record.clone());
        self.persist(rows)?;

        self.index.write().unwrap().insert(version, record);
        tracing::debug!(version, kek_alias, "registered key version");
        Ok(version)
    }

    fn resolve_version(&self, version: u32) -> Result<KeyVersionRecord, Error> {
        self.index
            .read()
            .unwrap()
            .get(&version)
            .cloned()
            .ok_or_else(|| Error::version_unknown(version))
    }

    fn latest_version(&self, kek_alias: &str) -> Result<u32, Error> {
        Ok(self
            .index
            .read()
            .unwrap()
            .values()
            .filter(|r| r.kek_alias == kek_alias)
            .map(|r| r.key_version)
            .max()
            .unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::sync::Arc;

    #[test]
    fn register_is_monotonic_from_one() {
        let store = InMemoryMetadataStore::new();
        assert_eq!(store.register("k1", "AES-256-GCM").unwrap(), 1);
        assert_eq!(store.register("k1", "AES-256-GCM").unwrap(), 2);
        assert_eq!(store.register("k2", "AES-256-GCM").unwrap(), 3);
    }

    #[test]
    fn resolve_returns_registered_row() {
        let store = InMemoryMetadataStore::new();
        store.register("k1", "AES-256-GCM").unwrap();
        let row = store.resolve_version(1).unwrap();
        assert_eq!(row.kek_alias, "k1");
        assert_eq!(row.algorithm, "AES-256-GCM");
    }

    #[test]
    fn resolve_unknown_version_fails() {
        let store = InMemoryMetadataStore::new();
        let err = store.resolve_version(42).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionUnknown);
    }

    #[test]
    fn latest_version_is_per_alias() {
        let store = InMemoryMetadataStore::new();
        assert_eq!(store.latest_version("k1").unwrap(), 0);
        store.register("k1", "AES-256-GCM").unwrap();
        store.register("k2", "AES-256-GCM").unwrap();
        store.register("k1", "AES-256-GCM").unwrap();
        assert_eq!(store.latest_version("k1").unwrap(), 3);
        assert_eq!(store.latest_version("k2").unwrap(), 2);
    }

    #[test]
    fn register_rejects_empty_args() {
        let store = InMemoryMetadataStore::new();
        assert_eq!(
            store.register("", "AES-256-GCM").unwrap_err().kind(),
            ErrorKind::InvalidArg
        );
        assert_eq!(
            store.register("k1", "").unwrap_err().kind(),
            ErrorKind::InvalidArg
        );
    }

    #[test]
    fn concurrent_register_is_unique_and_gap_free() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                (0..50)
                    .map(|_| store.register("k1", "AES-256-GCM").unwrap())
                    .collect::<Vec<_>>()
            }));
        }
        let mut versions: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        versions.sort_unstable();
        let expected: Vec<u32> = (1..=400).collect();
        assert_eq!(versions, expected);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileMetadataStore::open(dir.path(), "metadata.db").unwrap();
            assert_eq!(store.register("k1", "AES-256-GCM").unwrap(), 1);
            assert_eq!(store.register("k2", "AES-256-GCM").unwrap(), 2);
        }
        let reopened = FileMetadataStore::open(dir.path(), "metadata.db").unwrap();
        assert_eq!(reopened.latest_version("k1").unwrap(), 1);
        assert_eq!(reopened.latest_version("k2").unwrap(), 2);
        assert_eq!(reopened.register("k1", "AES-256-GCM").unwrap(), 3);
        assert_eq!(reopened.resolve_version(2).unwrap().kek_alias, "k2");
    }

    #[test]
    fn file_store_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("state").join(".encx");
        let store = FileMetadataStore::open(&nested, "metadata.db").unwrap();
        store.register("k1", "AES-256-GCM").unwrap();
        assert!(store.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn file_store_sets_directory_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let db_dir = dir.path().join(".encx");
        let _store = FileMetadataStore::open(&db_dir, "metadata.db").unwrap();
        let mode = fs::metadata(&db_dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn file_store_concurrent_register() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileMetadataStore::open(dir.path(), "metadata.db").unwrap());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                (0..10)
                    .map(|_| store.register("k1", "AES-256-GCM").unwrap())
                    .collect::<Vec<_>>()
            }));
        }
        let mut versions: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        versions.sort_unstable();
        assert_eq!(versions, (1..=40).collect::<Vec<_>>());
    }

    #[test]
    fn rows_are_ordered_by_version() {
        let store = InMemoryMetadataStore::new();
        store.register("k1", "AES-256-GCM").unwrap();
        store.register("k2", "AES-256-GCM").unwrap();
        store.register("k1", "AES-256-GCM").unwrap();

        let rows = store.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows.iter().map(|r| r.key_version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(rows[1].kek_alias, "k2");
    }

    #[test]
    fn file_store_rows_match_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileMetadataStore::open(dir.path(), "metadata.db").unwrap();
            store.register("k1", "AES-256-GCM").unwrap();
            store.register("k2", "AES-256-GCM").unwrap();
        }
        let reopened = FileMetadataStore::open(dir.path(), "metadata.db").unwrap();
        let rows = reopened.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].kek_alias, "k1");
        assert_eq!(rows[1].kek_alias, "k2");
    }

    #[test]
    fn registered_rows_are_immutable_across_reads() {
        let store = InMemoryMetadataStore::new();
        store.register("k1", "AES-256-GCM").unwrap();
        let first = store.resolve_version(1).unwrap();
        store.register("k2", "AES-256-GCM").unwrap();
        let again = store.resolve_version(1).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn file_store_rejects_corrupt_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.db");
        fs::write(&path, "not json").unwrap();
        let err = FileMetadataStore::open(dir.path(), "metadata.db").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }
}
