//! Filesystem layout of the artifact cache.
//!
//! Job artifacts live at `<root>/<sig[0]>/<sig>.<ext>`, module sub-cache
//! artifacts at `<root>/<module>/<sig>.<ext>`. Every artifact is first
//! written to a temporary sibling and renamed into place, so a reader never
//! sees a partially written file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::error::{DaemonError, Result};
use crate::types::Signature;

use super::job_file::JobFile;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Handle on the cache root directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Creates a store rooted at `root`. Nothing is created on disk yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a job artifact, sharded by the first signature character.
    pub fn job_path(&self, sig: &Signature, ext: &str) -> PathBuf {
        self.root.join(sig.shard()).join(format!("{}.{}", sig, ext))
    }

    /// Path of a module sub-cache artifact.
    pub fn module_path(&self, module: &str, sig: &Signature, ext: &str) -> PathBuf {
        self.root.join(module).join(format!("{}.{}", sig, ext))
    }

    /// Returns true if `path` is a regular file that can be opened for reading.
    pub fn is_readable(path: &Path) -> bool {
        path.is_file() && fs::File::open(path).is_ok()
    }

    /// Renews the job file of an artifact that is being served again.
    ///
    /// A missing or unreadable job file is logged and ignored: the garbage
    /// collector treats such artifacts as orphans.
    pub fn touch(&self, artifact: &Path) {
        match JobFile::renew(artifact) {
            Ok(true) => debug!(artifact = %artifact.display(), "renewed job file"),
            Ok(false) => {}
            Err(e) => warn!(artifact = %artifact.display(), error = %e, "could not renew job file"),
        }
    }
}

/// Creates the parent directory of `path` if needed.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DaemonError::io("create directory", parent, e))?;
    }
    Ok(())
}

/// A unique temporary sibling of `target` keeping its extension, so format
/// detection by extension still works on the temporary file.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match target.extension() {
        Some(ext) => format!("{}.tmp{}-{}.{}", stem, std::process::id(), n, ext.to_string_lossy()),
        None => format!("{}.tmp{}-{}", stem, std::process::id(), n),
    };
    target.with_file_name(name)
}

/// Moves a finished temporary file into its final place.
pub fn commit(temp: &Path, target: &Path) -> Result<()> {
    fs::rename(temp, target).map_err(|e| {
        let _ = fs::remove_file(temp);
        DaemonError::io("move into place", target, e)
    })
}

/// Writes `bytes` to `path` through a temporary sibling and a rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let temp = temp_path_for(path);
    fs::write(&temp, bytes).map_err(|e| DaemonError::io("write", &temp, e))?;
    commit(&temp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::signature;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn job_path_is_sharded() {
        let store = CacheStore::new("/cache");
        let sig = signature(&json!("x"));
        let path = store.job_path(&sig, "wav");
        assert_eq!(path.parent().unwrap(), Path::new("/cache").join(sig.shard()));
        assert_eq!(path.file_name().unwrap().to_string_lossy(), format!("{}.wav", sig));
    }

    #[test]
    fn module_path_uses_module_folder() {
        let store = CacheStore::new("/cache");
        let sig = signature(&json!("y"));
        assert_eq!(
            store.module_path("pad", &sig, "wav"),
            PathBuf::from(format!("/cache/pad/{}.wav", sig))
        );
    }

    #[test]
    fn temp_paths_are_unique_and_keep_extension() {
        let a = temp_path_for(Path::new("/c/abc.flac"));
        let b = temp_path_for(Path::new("/c/abc.flac"));
        assert_ne!(a, b);
        assert_eq!(a.extension().unwrap(), "flac");
        assert_eq!(a.parent().unwrap(), Path::new("/c"));
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b.job");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        // Only the final file remains.
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn readable_checks_regular_files() {
        let dir = tempdir().unwrap();
        assert!(!CacheStore::is_readable(dir.path()));
        let file = dir.path().join("x.wav");
        fs::write(&file, b"data").unwrap();
        assert!(CacheStore::is_readable(&file));
    }
}
