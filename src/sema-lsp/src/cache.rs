//! Content-hash-keyed symbol cache.
//!
//! Stores the annotated symbol tree and the flat overview for each file,
//! keyed by the SHA-256 of the file content at the time the server answered
//! `documentSymbol`. No time-based expiry: a hash mismatch is the only
//! invalidation. Persisted per project and language under a versioned
//! schema key; a version mismatch drops the store.

use crate::symbols::SymbolInfo;
use lsp_types::SymbolKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Bump when the serialized shape of [`SymbolCacheEntry`] changes.
pub const SYMBOL_CACHE_VERSION: u32 = 1;

const CACHE_FILE_NAME: &str = "document_symbols.json";

/// Hex SHA-256 of file content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cached symbol information for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolCacheEntry {
    pub content_hash: String,
    /// Annotated tree, stored without bodies (bodies derive from content).
    pub symbols: Vec<SymbolInfo>,
    /// Flat `(name_path, kind)` overview of the file.
    pub overview: Vec<(String, SymbolKind)>,
}

#[derive(Serialize, Deserialize)]
struct PersistedCache {
    version: u32,
    entries: HashMap<String, SymbolCacheEntry>,
}

/// Per-language symbol cache for one project.
pub struct SymbolCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, SymbolCacheEntry>>,
    dirty: AtomicBool,
}

impl SymbolCache {
    /// Loads the cache from `dir/document_symbols.json`, dropping it on a
    /// schema-version mismatch.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(CACHE_FILE_NAME);
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<PersistedCache>(&bytes) {
                Ok(persisted) if persisted.version == SYMBOL_CACHE_VERSION => {
                    debug!(
                        "Loaded {} symbol cache entries from {}",
                        persisted.entries.len(),
                        path.display()
                    );
                    persisted.entries
                }
                Ok(persisted) => {
                    info!(
                        "Symbol cache at {} has version {} (expected {}); ignoring",
                        path.display(),
                        persisted.version,
                        SYMBOL_CACHE_VERSION
                    );
                    HashMap::new()
                }
                Err(e) => {
                    warn!("Symbol cache at {} is unreadable: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    /// Cache hit iff the stored hash matches the current content hash.
    pub fn get(&self, relative_path: &str, current_hash: &str) -> Option<SymbolCacheEntry> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(relative_path)
            .filter(|entry| entry.content_hash == current_hash)
            .cloned()
    }

    pub fn insert(&self, relative_path: &str, entry: SymbolCacheEntry) {
        self.entries
            .lock()
            .unwrap()
            .insert(relative_path.to_string(), entry);
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn invalidate(&self, relative_path: &str) {
        if self
            .entries
            .lock()
            .unwrap()
            .remove(relative_path)
            .is_some()
        {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    /// Persists the cache if anything changed since the last save.
    pub fn save(&self) -> std::io::Result<()> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let persisted = PersistedCache {
            version: SYMBOL_CACHE_VERSION,
            entries: self.entries.lock().unwrap().clone(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(&persisted)?;
        std::fs::write(&self.path, bytes)?;
        debug!(
            "Saved {} symbol cache entries to {}",
            persisted.entries.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(hash: &str) -> SymbolCacheEntry {
        SymbolCacheEntry {
            content_hash: hash.to_string(),
            symbols: Vec::new(),
            overview: vec![("foo".to_string(), SymbolKind::FUNCTION)],
        }
    }

    #[test]
    fn hit_requires_matching_hash() {
        let dir = tempdir().unwrap();
        let cache = SymbolCache::load(dir.path());
        cache.insert("a.py", entry("h1"));
        assert!(cache.get("a.py", "h1").is_some());
        assert!(cache.get("a.py", "h2").is_none(), "stale hash must miss");
        assert!(cache.get("b.py", "h1").is_none());
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempdir().unwrap();
        let cache = SymbolCache::load(dir.path());
        cache.insert("a.py", entry("h1"));
        cache.save().unwrap();

        let reloaded = SymbolCache::load(dir.path());
        let entry = reloaded.get("a.py", "h1").unwrap();
        assert_eq!(entry.overview[0].0, "foo");
        assert_eq!(entry.overview[0].1, SymbolKind::FUNCTION);
    }

    #[test]
    fn version_mismatch_drops_the_store() {
        let dir = tempdir().unwrap();
        let stale = serde_json::json!({
            "version": SYMBOL_CACHE_VERSION + 1,
            "entries": {"a.py": {"content_hash": "h", "symbols": [], "overview": []}},
        });
        std::fs::write(
            dir.path().join(CACHE_FILE_NAME),
            serde_json::to_vec(&stale).unwrap(),
        )
        .unwrap();
        let cache = SymbolCache::load(dir.path());
        assert!(cache.get("a.py", "h").is_none());
    }

    #[test]
    fn invalidate_removes_the_entry() {
        let dir = tempdir().unwrap();
        let cache = SymbolCache::load(dir.path());
        cache.insert("a.py", entry("h1"));
        cache.invalidate("a.py");
        assert!(cache.get("a.py", "h1").is_none());
    }

    #[test]
    fn content_hash_is_stable_and_content_sensitive() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }
}
