use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Identifies one cached artifact variant of a job: the artifact family
/// picks the cache subdirectory, the extension disambiguates variants of
/// the same family (raw `laz` vs the decoded `points` buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKey {
    pub family: &'static str,
    pub ext: &'static str,
}

impl CacheKey {
    pub const fn new(family: &'static str, ext: &'static str) -> Self {
        Self { family, ext }
    }
}

/// Storage seam between the handlers and the filesystem. Injected so tests
/// can point it at a scratch directory instead of the shared temp root.
pub trait CacheStore: Send + Sync {
    /// Path of a still-fresh entry, or `None` when the file is missing or
    /// its modification time has aged past the TTL. Expired files are left
    /// in place; a later `put` simply overwrites them.
    fn get(&self, job_id: &str, key: &CacheKey) -> Option<PathBuf>;

    /// Write an entry, creating the family directory as needed.
    fn put(&self, job_id: &str, key: &CacheKey, bytes: &[u8]) -> io::Result<PathBuf>;
}

/// Filesystem cache: `{root}/{family}-cache/{job_id}.{ext}` with freshness
/// judged purely by file modification time. No separate ledger, no
/// eviction sweep.
pub struct DiskCache {
    root: PathBuf,
    ttl: Duration,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    fn entry_path(&self, job_id: &str, key: &CacheKey) -> PathBuf {
        self.root
            .join(format!("{}-cache", key.family))
            .join(format!("{}.{}", job_id, key.ext))
    }

    fn is_fresh(&self, path: &Path) -> bool {
        let Ok(meta) = fs::metadata(path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        match modified.elapsed() {
            Ok(age) => age < self.ttl,
            // A future mtime (clock skew) counts as fresh rather than
            // triggering a refetch loop.
            Err(_) => true,
        }
    }
}

impl CacheStore for DiskCache {
    fn get(&self, job_id: &str, key: &CacheKey) -> Option<PathBuf> {
        let path = self.entry_path(job_id, key);
        self.is_fresh(&path).then_some(path)
    }

    fn put(&self, job_id: &str, key: &CacheKey, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.entry_path(job_id, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(path)
    }
}
