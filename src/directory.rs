//! Port directory: the persisted slug -> backend port mapping
//!
//! The directory is maintained by an external provisioning process; the
//! gateway only reads it. Lookups go through a snapshot cache with a bounded
//! staleness window so external updates become visible without re-reading the
//! store on every request.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from the directory backing store
///
/// An absent slug is not an error: `resolve` returns `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to read directory file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("directory file {path} is not a valid slug -> port document: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("directory entry for '{slug}' has invalid port value {value}")]
    InvalidPort { slug: String, value: String },
}

/// A point-in-time view of the directory contents
pub type DirectorySnapshot = HashMap<String, u16>;

/// Backing store for the port directory
///
/// One implementation reads the provisioner's JSON file; tests use the
/// in-memory store. Swapping in a key-value service later means implementing
/// this trait, nothing else.
pub trait DirectoryStore: Send + Sync {
    fn load(&self) -> Result<DirectorySnapshot, DirectoryError>;
}

/// File-backed store: a JSON object `{"slug": port, ...}` at a well-known path
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DirectoryStore for FileStore {
    fn load(&self) -> Result<DirectorySnapshot, DirectoryError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            // No directory yet provisioned: every lookup is a miss, not a crash
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Directory file absent, treating as empty");
                return Ok(DirectorySnapshot::new());
            }
            Err(e) => {
                return Err(DirectoryError::Io {
                    path: self.path.display().to_string(),
                    source: e,
                })
            }
        };

        let parsed: HashMap<String, serde_json::Value> =
            serde_json::from_str(&raw).map_err(|e| DirectoryError::Malformed {
                path: self.path.display().to_string(),
                source: e,
            })?;

        let mut snapshot = DirectorySnapshot::with_capacity(parsed.len());
        for (slug, value) in parsed {
            let port = validate_port(&slug, &value)?;
            snapshot.insert(slug, port);
        }
        Ok(snapshot)
    }
}

/// Validate a raw directory value as a TCP port in [1, 65535]
///
/// Non-numeric or out-of-range values are a provisioning bug, surfaced as an
/// internal fault rather than guessed around.
fn validate_port(slug: &str, value: &serde_json::Value) -> Result<u16, DirectoryError> {
    let invalid = || DirectoryError::InvalidPort {
        slug: slug.to_string(),
        value: value.to_string(),
    };

    let n = value.as_u64().ok_or_else(invalid)?;
    if n == 0 || n > u64::from(u16::MAX) {
        return Err(invalid());
    }
    Ok(n as u16)
}

/// In-memory store, used by tests and embedded setups
pub struct MemoryStore {
    entries: RwLock<DirectorySnapshot>,
}

impl MemoryStore {
    pub fn new(entries: DirectorySnapshot) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn set(&self, slug: impl Into<String>, port: u16) {
        self.entries.write().insert(slug.into(), port);
    }

    pub fn remove(&self, slug: &str) {
        self.entries.write().remove(slug);
    }
}

impl DirectoryStore for MemoryStore {
    fn load(&self) -> Result<DirectorySnapshot, DirectoryError> {
        Ok(self.entries.read().clone())
    }
}

struct CachedSnapshot {
    entries: DirectorySnapshot,
    loaded_at: Instant,
}

/// The port directory with its resolver
///
/// Owned by the process and injected into the request handlers; all state
/// lives here rather than in ad hoc file reads at call sites.
pub struct PortDirectory {
    store: Box<dyn DirectoryStore>,
    cache: RwLock<Option<CachedSnapshot>>,
    max_staleness: Duration,
}

impl PortDirectory {
    pub fn new(store: Box<dyn DirectoryStore>, max_staleness: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(None),
            max_staleness,
        }
    }

    /// Resolve a tenant slug to its backend port
    ///
    /// `Ok(None)` is the normal negative result: the tenant is not provisioned
    /// or not yet started. Errors mean the directory itself is unreadable.
    pub fn resolve(&self, slug: &str) -> Result<Option<u16>, DirectoryError> {
        {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref() {
                if cached.loaded_at.elapsed() < self.max_staleness {
                    return Ok(cached.entries.get(slug).copied());
                }
            }
        }
        self.reload(false)?;
        let cache = self.cache.read();
        Ok(cache
            .as_ref()
            .and_then(|cached| cached.entries.get(slug).copied()))
    }

    /// Discard the cached snapshot and re-read the store immediately
    pub fn refresh(&self) -> Result<DirectorySnapshot, DirectoryError> {
        self.reload(true)?;
        let cache = self.cache.read();
        Ok(cache
            .as_ref()
            .map(|cached| cached.entries.clone())
            .unwrap_or_default())
    }

    /// Current snapshot, re-read if stale (used for startup tunnel registration)
    pub fn snapshot(&self) -> Result<DirectorySnapshot, DirectoryError> {
        {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref() {
                if cached.loaded_at.elapsed() < self.max_staleness {
                    return Ok(cached.entries.clone());
                }
            }
        }
        self.refresh()
    }

    fn reload(&self, force: bool) -> Result<(), DirectoryError> {
        let mut cache = self.cache.write();
        // Another handler may have reloaded while we waited for the lock
        if !force {
            if let Some(cached) = cache.as_ref() {
                if cached.loaded_at.elapsed() < self.max_staleness {
                    return Ok(());
                }
            }
        }
        match self.store.load() {
            Ok(entries) => {
                debug!(tenants = entries.len(), "Directory snapshot loaded");
                *cache = Some(CachedSnapshot {
                    entries,
                    loaded_at: Instant::now(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to load port directory");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn memory_directory(entries: &[(&str, u16)]) -> PortDirectory {
        let map: DirectorySnapshot = entries
            .iter()
            .map(|(slug, port)| (slug.to_string(), *port))
            .collect();
        PortDirectory::new(
            Box::new(MemoryStore::new(map)),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_resolve_present_and_absent() {
        let directory = memory_directory(&[("acme", 4001), ("blog", 4002)]);

        assert_eq!(directory.resolve("acme").unwrap(), Some(4001));
        assert_eq!(directory.resolve("blog").unwrap(), Some(4002));
        assert_eq!(directory.resolve("ghost").unwrap(), None);
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        let directory = memory_directory(&[("acme", 4001)]);

        assert_eq!(directory.resolve("Acme").unwrap(), None);
        assert_eq!(directory.resolve("ACME").unwrap(), None);
    }

    #[test]
    fn test_external_update_visible_after_staleness_window() {
        let store = std::sync::Arc::new(MemoryStore::new(DirectorySnapshot::new()));

        struct Shared(std::sync::Arc<MemoryStore>);
        impl DirectoryStore for Shared {
            fn load(&self) -> Result<DirectorySnapshot, DirectoryError> {
                self.0.load()
            }
        }

        let directory = PortDirectory::new(
            Box::new(Shared(store.clone())),
            Duration::from_millis(5),
        );
        assert_eq!(directory.resolve("acme").unwrap(), None);

        store.set("acme", 4001);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(directory.resolve("acme").unwrap(), Some(4001));
    }

    #[test]
    fn test_missing_file_is_empty_directory() {
        let directory = PortDirectory::new(
            Box::new(FileStore::new("/nonexistent/sitegate-ports.json")),
            Duration::from_secs(1),
        );
        assert_eq!(directory.resolve("acme").unwrap(), None);
    }

    #[test]
    fn test_file_store_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"acme": 4001, "blog": 4002}}"#).unwrap();

        let directory = PortDirectory::new(
            Box::new(FileStore::new(file.path())),
            Duration::from_secs(1),
        );
        assert_eq!(directory.resolve("acme").unwrap(), Some(4001));
        assert_eq!(directory.resolve("blog").unwrap(), Some(4002));
        assert_eq!(directory.resolve("ghost").unwrap(), None);
    }

    #[test]
    fn test_non_numeric_port_is_fault() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"acme": "not-a-port"}}"#).unwrap();

        let directory = PortDirectory::new(
            Box::new(FileStore::new(file.path())),
            Duration::from_secs(1),
        );
        let err = directory.resolve("acme").unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidPort { .. }));
    }

    #[test]
    fn test_out_of_range_port_is_fault() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"acme": 70000}}"#).unwrap();

        let directory = PortDirectory::new(
            Box::new(FileStore::new(file.path())),
            Duration::from_secs(1),
        );
        assert!(matches!(
            directory.resolve("acme").unwrap_err(),
            DirectoryError::InvalidPort { .. }
        ));
    }

    #[test]
    fn test_zero_port_is_fault() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"acme": 0}}"#).unwrap();

        let directory = PortDirectory::new(
            Box::new(FileStore::new(file.path())),
            Duration::from_secs(1),
        );
        assert!(matches!(
            directory.resolve("acme").unwrap_err(),
            DirectoryError::InvalidPort { .. }
        ));
    }

    #[test]
    fn test_malformed_document_is_fault() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json at all").unwrap();

        let directory = PortDirectory::new(
            Box::new(FileStore::new(file.path())),
            Duration::from_secs(1),
        );
        assert!(matches!(
            directory.resolve("acme").unwrap_err(),
            DirectoryError::Malformed { .. }
        ));
    }

    #[test]
    fn test_refresh_forces_reload() {
        let store = std::sync::Arc::new(MemoryStore::new(DirectorySnapshot::new()));

        struct Shared(std::sync::Arc<MemoryStore>);
        impl DirectoryStore for Shared {
            fn load(&self) -> Result<DirectorySnapshot, DirectoryError> {
                self.0.load()
            }
        }

        // Long staleness window: only refresh() should pick up the write
        let directory = PortDirectory::new(
            Box::new(Shared(store.clone())),
            Duration::from_secs(3600),
        );
        assert_eq!(directory.resolve("acme").unwrap(), None);

        store.set("acme", 4001);
        assert_eq!(directory.resolve("acme").unwrap(), None);

        let snapshot = directory.refresh().unwrap();
        assert_eq!(snapshot.get("acme"), Some(&4001));
    }
}
