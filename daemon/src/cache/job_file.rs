//! Job files: the metadata sidecar of every cache artifact.
//!
//! A job file sits next to its artifact with the same stem and the `.job`
//! extension. It records the absolute source files the artifact derives from,
//! its expiration, and the stack that produced it. The garbage collector only
//! reasons from job files.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DaemonError, Result};
use crate::types::{absolutize, Expiration};

use super::store::atomic_write;

/// Extension of job files.
pub const JOB_FILE_EXTENSION: &str = "job";

/// Sidecar metadata of a cache artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFile {
    /// Absolute path of the artifact.
    pub target: PathBuf,
    /// Absolute paths the artifact was derived from.
    pub source_files: BTreeSet<PathBuf>,
    /// Expiration, or None if the artifact never expires.
    pub cache_expiration: Option<Expiration>,
    /// Stack that produced the artifact.
    #[serde(default)]
    pub stack: Value,
}

impl JobFile {
    /// Creates a job file for `target`. Paths are made absolute.
    pub fn new<I>(target: &Path, sources: I, cache_expiration: Option<Expiration>, stack: Value) -> Result<Self>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let source_files = sources
            .into_iter()
            .map(|p| absolutize(&p))
            .collect::<Result<BTreeSet<_>>>()?;
        Ok(Self {
            target: absolutize(target)?,
            source_files,
            cache_expiration,
            stack,
        })
    }

    /// Path of the job file belonging to an artifact.
    pub fn path_for(target: &Path) -> PathBuf {
        target.with_extension(JOB_FILE_EXTENSION)
    }

    /// Writes the job file next to its target.
    pub fn write(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| {
            DaemonError::with_source(
                crate::error::ErrorCode::Io,
                format!("Failed to serialize job file for '{}'", self.target.display()),
                e,
            )
        })?;
        atomic_write(&Self::path_for(&self.target), &bytes)
    }

    /// Reads a job file.
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| DaemonError::io("read", path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            DaemonError::with_source(
                crate::error::ErrorCode::Io,
                format!("Invalid job file '{}'", path.display()),
                e,
            )
        })
    }

    /// Reads the job file of an artifact.
    pub fn load_for(target: &Path) -> Result<Self> {
        Self::read(&Self::path_for(target))
    }

    /// Renews the expiration of an artifact's job file.
    ///
    /// Returns Ok(false) when the artifact never expires and nothing was written.
    pub fn renew(target: &Path) -> Result<bool> {
        let mut job = Self::load_for(target)?;
        match job.cache_expiration {
            Some(expiration) => {
                job.cache_expiration = Some(expiration.renewed());
                job.write()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns true if the artifact has expired.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.cache_expiration
            .map(|e| e.is_expired(now))
            .unwrap_or(false)
    }

    /// Source files that no longer exist.
    pub fn missing_sources(&self) -> Vec<&Path> {
        self.source_files
            .iter()
            .filter(|p| !p.exists())
            .map(PathBuf::as_path)
            .collect()
    }
}
