//! Incremental generation cache: file-hash-keyed rebuild gating.
//!
//! A JSON sidecar maps each scanned source to the SHA-256 of its contents
//! and the generated file it produced. A source is regenerated iff its hash
//! differs, its generated file is missing, or the generator version tag
//! changed. The cache never causes stale output: on any doubt, regenerate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GenError;
use crate::GENERATOR_VERSION;

/// Sidecar file name, kept in the working directory.
pub const CACHE_FILE: &str = ".encx-gen-cache.json";

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
struct GeneratedEntry {
    path: String,
    hash: String,
    time: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CacheEntry {
    source_hash: String,
    generated: GeneratedEntry,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    generator_version: String,
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub struct GenerationCache {
    path: PathBuf,
    file: CacheFile,
}

impl GenerationCache {
    /// Load the cache beside the working directory, tolerating a missing or
    /// unreadable sidecar (treated as empty: everything regenerates).
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join(CACHE_FILE);
        let file = std::fs::read_to_string(&path)
            .ok()
            .and_then(|data| serde_json::from_str::<CacheFile>(&data).ok())
            .unwrap_or_default();
        Self { path, file }
    }

    /// Whether `source_path` must be regenerated given its current hash.
    pub fn needs_regenerate(&self, source_path: &Path, source_hash: &str) -> bool {
        if self.file.generator_version != GENERATOR_VERSION {
            return true;
        }
        let key = source_path.to_string_lossy();
        match self.file.entries.get(key.as_ref()) {
            None => true,
            Some(entry) => {
                entry.source_hash != source_hash
                    || !Path::new(&entry.generated.path).exists()
            }
        }
    }

    /// Record a completed generation.
    pub fn record(
        &mut self,
        source_path: &Path,
        source_hash: String,
        generated_path: &Path,
        generated_hash: String,
    ) {
        self.file.entries.insert(
            source_path.to_string_lossy().into_owned(),
            CacheEntry {
                source_hash,
                generated: GeneratedEntry {
                    path: generated_path.to_string_lossy().into_owned(),
                    hash: generated_hash,
                    time: Utc::now(),
                },
            },
        );
    }

    /// Paths of every generated file the cache knows about.
    pub fn generated_paths(&self) -> Vec<PathBuf> {
        self.file
            .entries
            .values()
            .map(|entry| PathBuf::from(&entry.generated.path))
            .collect()
    }

    /// Number of tracked sources.
    pub fn len(&self) -> usize {
        self.file.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.entries.is_empty()
    }

    /// Remove the sidecar file itself.
    pub fn delete(self) -> Result<(), GenError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| GenError::io(&self.path, e))?;
        }
        Ok(())
    }

    /// Drop entries for sources that no longer exist.
    pub fn prune_missing(&mut self) {
        self.file
            .entries
            .retain(|source, _| Path::new(source).exists());
    }

    /// Persist the sidecar, stamping the current generator version.
    pub fn save(&mut self) -> Result<(), GenError> {
        self.file.generator_version = GENERATOR_VERSION.to_string();
        let json = serde_json::to_string_pretty(&self.file)
            .map_err(|e| GenError::Config(format!("serialize cache: {}", e)))?;
        std::fs::write(&self.path, json).map_err(|e| GenError::io(&self.path, e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cache_regenerates_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GenerationCache::load(dir.path());
        assert!(cache.needs_regenerate(Path::new("src/user.rs"), "abc"));
    }

    #[test]
    fn unchanged_source_with_existing_output_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("user.rs");
        let generated = dir.path().join("user_encx.rs");
        std::fs::write(&source, "struct User;").unwrap();
        std::fs::write(&generated, "// generated").unwrap();

        let hash = sha256_hex(b"struct User;");
        let mut cache = GenerationCache::load(dir.path());
        cache.record(&source, hash.clone(), &generated, sha256_hex(b"// generated"));
        cache.save().unwrap();

        let reloaded = GenerationCache::load(dir.path());
        assert!(!reloaded.needs_regenerate(&source, &hash));
    }

    #[test]
    fn changed_hash_forces_regeneration() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("user.rs");
        let generated = dir.path().join("user_encx.rs");
        std::fs::write(&generated, "// generated").unwrap();

        let mut cache = GenerationCache::load(dir.path());
        cache.record(&source, sha256_hex(b"v1"), &generated, "h".into());
        cache.save().unwrap();

        let reloaded = GenerationCache::load(dir.path());
        // One byte of difference in the source flips the hash.
        assert!(reloaded.needs_regenerate(&source, &sha256_hex(b"v2")));
        assert!(!reloaded.needs_regenerate(&source, &sha256_hex(b"v1")));
    }

    #[test]
    fn missing_generated_file_forces_regeneration() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("user.rs");
        let generated = dir.path().join("user_encx.rs");

        let mut cache = GenerationCache::load(dir.path());
        cache.record(&source, "h".into(), &generated, "g".into());
        cache.save().unwrap();

        let reloaded = GenerationCache::load(dir.path());
        assert!(reloaded.needs_regenerate(&source, "h"));
    }

    #[test]
    fn version_tag_change_forces_regeneration() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("user.rs");
        let generated = dir.path().join("user_encx.rs");
        std::fs::write(&generated, "x").unwrap();

        // A cache written by some other generator version.
        let stale = format!(
            r#"{{
              "generator_version": "encx-gen 0.0.1 encoding-v0",
              "entries": {{
                "{source}": {{
                  "source_hash": "h",
                  "generated": {{
                    "path": "{generated}",
                    "hash": "g",
                    "time": "2026-01-01T00:00:00Z"
                  }}
                }}
              }}
            }}"#,
            source = source.display(),
            generated = generated.display(),
        );
        std::fs::write(dir.path().join(CACHE_FILE), stale).unwrap();

        let cache = GenerationCache::load(dir.path());
        assert!(cache.needs_regenerate(&source, "h"));
    }

    #[test]
    fn corrupt_cache_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CACHE_FILE), "{ not json").unwrap();
        let cache = GenerationCache::load(dir.path());
        assert!(cache.needs_regenerate(Path::new("x.rs"), "h"));
    }

    #[test]
    fn generated_paths_and_len_track_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = GenerationCache::load(dir.path());
        assert!(cache.is_empty());

        cache.record(
            Path::new("a.rs"),
            "h".into(),
            Path::new("a_encx.rs"),
            "g".into(),
        );
        cache.record(
            Path::new("b.rs"),
            "h".into(),
            Path::new("b_encx.rs"),
            "g".into(),
        );
        assert_eq!(cache.len(), 2);
        let mut paths = cache.generated_paths();
        paths.sort();
        assert_eq!(paths, vec![PathBuf::from("a_encx.rs"), PathBuf::from("b_encx.rs")]);
    }

    #[test]
    fn delete_removes_the_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = GenerationCache::load(dir.path());
        cache.record(Path::new("a.rs"), "h".into(), Path::new("a_encx.rs"), "g".into());
        cache.save().unwrap();
        assert!(dir.path().join(CACHE_FILE).exists());

        let cache = GenerationCache::load(dir.path());
        cache.delete().unwrap();
        assert!(!dir.path().join(CACHE_FILE).exists());
    }

    #[test]
    fn prune_drops_deleted_sources() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.rs");
        std::fs::write(&kept, "x").unwrap();
        let gone = dir.path().join("gone.rs");

        let mut cache = GenerationCache::load(dir.path());
        cache.record(&kept, "h".into(), &kept, "g".into());
        cache.record(&gone, "h".into(), &gone, "g".into());
        cache.prune_missing();
        cache.save().unwrap();

        let data = std::fs::read_to_string(dir.path().join(CACHE_FILE)).unwrap();
        assert!(data.contains("kept.rs"));
        assert!(!data.contains("gone.rs"));
    }
}
