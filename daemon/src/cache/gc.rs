//! Offline garbage collection of the cache directory.
//!
//! The collector walks the cache root and decides for every artifact, using
//! only its job file, whether it is still worth keeping. It runs independently
//! of the live server; artifacts that may be in the middle of being written
//! are protected by a safety window.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{DaemonError, Result};

use super::job_file::{JobFile, JOB_FILE_EXTENSION};

/// Default safety window for artifacts with unreadable metadata.
pub const DEFAULT_SAFETY_WINDOW: Duration = Duration::from_secs(120);

/// How aggressive a collection run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcLevel {
    /// Delete orphaned, expired and stale artifacts.
    #[default]
    Default,
    /// Delete every file under the root, keeping directories.
    Purge,
}

impl GcLevel {
    /// Parses a level name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" | "0" => Some(GcLevel::Default),
            "purge" | "all" => Some(GcLevel::Purge),
            _ => None,
        }
    }
}

/// Options of a collection run.
#[derive(Debug, Clone)]
pub struct GcOptions {
    pub level: GcLevel,
    /// Decide everything, delete nothing.
    pub simulate: bool,
    /// Artifacts younger than this with unreadable metadata are kept.
    pub safety_window: Duration,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            level: GcLevel::Default,
            simulate: false,
            safety_window: DEFAULT_SAFETY_WINDOW,
        }
    }
}

/// Outcome of a collection run. In simulate mode, deletions are the files
/// that would have been deleted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcReport {
    pub kept: Vec<PathBuf>,
    pub deleted_artifacts: Vec<PathBuf>,
    pub deleted_job_files: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

impl GcReport {
    /// Returns true if every intended deletion succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Why an artifact is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Keep,
    Orphan,
    Expired,
    MissingSources,
}

/// Runs a collection over `root`.
pub fn collect(root: &Path, options: &GcOptions) -> Result<GcReport> {
    if !root.is_dir() {
        return Err(DaemonError::config(format!(
            "Cache folder '{}' does not exist",
            root.display()
        )));
    }
    info!(
        root = %root.display(),
        level = ?options.level,
        simulate = options.simulate,
        "starting garbage collection"
    );

    let mut report = GcReport::default();
    let mut artifacts = Vec::new();
    let mut job_files = HashSet::new();

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                warn!(path = %path.display(), error = %e, "cannot walk cache entry");
                report.failures.push((path, e.to_string()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if path.extension().is_some_and(|e| e == JOB_FILE_EXTENSION) {
            job_files.insert(path);
        } else {
            artifacts.push(path);
        }
    }
    artifacts.sort();

    if options.level == GcLevel::Purge {
        for artifact in artifacts {
            remove(&artifact, options.simulate, &mut report.deleted_artifacts, &mut report.failures);
        }
        let mut job_files: Vec<_> = job_files.into_iter().collect();
        job_files.sort();
        for job_file in job_files {
            remove(&job_file, options.simulate, &mut report.deleted_job_files, &mut report.failures);
        }
        finish(&report, options);
        return Ok(report);
    }

    let now = SystemTime::now();
    for artifact in artifacts {
        let job_path = JobFile::path_for(&artifact);
        let had_job_file = job_files.remove(&job_path);

        let verdict = if had_job_file {
            match JobFile::read(&job_path) {
                Ok(job) if job.is_expired(now) => Verdict::Expired,
                Ok(job) if !job.missing_sources().is_empty() => Verdict::MissingSources,
                Ok(_) => Verdict::Keep,
                Err(e) if is_recent(&artifact, now, options.safety_window) => {
                    debug!(artifact = %artifact.display(), error = %e, "keeping recent artifact with unreadable job file");
                    Verdict::Keep
                }
                Err(e) => {
                    debug!(artifact = %artifact.display(), error = %e, "unreadable job file");
                    Verdict::Orphan
                }
            }
        } else if is_recent(&artifact, now, options.safety_window) {
            // Its job file may not be written yet.
            Verdict::Keep
        } else {
            Verdict::Orphan
        };

        match verdict {
            Verdict::Keep => {
                debug!(artifact = %artifact.display(), "keeping");
                report.kept.push(artifact);
            }
            verdict => {
                info!(artifact = %artifact.display(), reason = ?verdict, "deleting");
                remove(&artifact, options.simulate, &mut report.deleted_artifacts, &mut report.failures);
                if had_job_file {
                    remove(&job_path, options.simulate, &mut report.deleted_job_files, &mut report.failures);
                }
            }
        }
    }

    // Job files never matched to an artifact.
    let mut leftovers: Vec<_> = job_files.into_iter().collect();
    leftovers.sort();
    for job_file in leftovers {
        if is_recent(&job_file, now, options.safety_window) {
            report.kept.push(job_file);
            continue;
        }
        info!(job_file = %job_file.display(), "deleting orphan job file");
        remove(&job_file, options.simulate, &mut report.deleted_job_files, &mut report.failures);
    }

    finish(&report, options);
    Ok(report)
}

fn finish(report: &GcReport, options: &GcOptions) {
    info!(
        kept = report.kept.len(),
        deleted_artifacts = report.deleted_artifacts.len(),
        deleted_job_files = report.deleted_job_files.len(),
        failures = report.failures.len(),
        simulate = options.simulate,
        "garbage collection finished"
    );
}

fn is_recent(path: &Path, now: SystemTime, window: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| now.duration_since(modified).unwrap_or(Duration::ZERO) < window)
        .unwrap_or(false)
}

fn remove(path: &Path, simulate: bool, deleted: &mut Vec<PathBuf>, failures: &mut Vec<(PathBuf, String)>) {
    if simulate {
        deleted.push(path.to_path_buf());
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => deleted.push(path.to_path_buf()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not delete");
            failures.push((path.to_path_buf(), e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Expiration;
    use serde_json::Value;
    use tempfile::tempdir;

    fn no_window() -> GcOptions {
        GcOptions {
            safety_window: Duration::ZERO,
            ..GcOptions::default()
        }
    }

    fn artifact(dir: &Path, name: &str, sources: Vec<PathBuf>, expiration: Option<Expiration>) -> PathBuf {
        let path = dir.join("a").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"audio").unwrap();
        JobFile::new(&path, sources, expiration, Value::Null)
            .unwrap()
            .write()
            .unwrap();
        path
    }

    #[test]
    fn keeps_valid_and_deletes_missing_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.wav");
        fs::write(&source, b"x").unwrap();
        let cache = dir.path().join("cache");

        let kept = artifact(&cache, "kept.wav", vec![source.clone()], None);
        let stale = artifact(&cache, "stale.wav", vec![dir.path().join("gone.wav")], None);

        let report = collect(&cache, &no_window()).unwrap();
        assert_eq!(report.kept, vec![kept.clone()]);
        assert_eq!(report.deleted_artifacts, vec![stale.clone()]);
        assert!(kept.exists());
        assert!(!stale.exists());
        assert!(!JobFile::path_for(&stale).exists());
    }

    #[test]
    fn deletes_expired() {
        let dir = tempdir().unwrap();
        let expired = Expiration {
            expires_at: SystemTime::now() - Duration::from_secs(5),
            renew_hours: 1.0,
        };
        let path = artifact(dir.path(), "old.wav", Vec::new(), Some(expired));

        let report = collect(dir.path(), &no_window()).unwrap();
        assert_eq!(report.deleted_artifacts, vec![path.clone()]);
        assert!(!path.exists());
    }

    #[test]
    fn deletes_orphans_outside_safety_window() {
        let dir = tempdir().unwrap();
        let orphan = dir.path().join("a").join("orphan.wav");
        fs::create_dir_all(orphan.parent().unwrap()).unwrap();
        fs::write(&orphan, b"audio").unwrap();
        let stray_job = dir.path().join("a").join("stray.job");
        fs::write(&stray_job, b"{}").unwrap();

        // Within the window both are protected.
        let report = collect(dir.path(), &GcOptions::default()).unwrap();
        assert!(report.deleted_artifacts.is_empty());
        assert!(orphan.exists());

        let report = collect(dir.path(), &no_window()).unwrap();
        assert_eq!(report.deleted_artifacts, vec![orphan.clone()]);
        assert_eq!(report.deleted_job_files, vec![stray_job.clone()]);
        assert!(!stray_job.exists());
    }

    #[test]
    fn simulate_deletes_nothing() {
        let dir = tempdir().unwrap();
        let stale = artifact(dir.path(), "stale.wav", vec![dir.path().join("gone.wav")], None);
        let options = GcOptions {
            simulate: true,
            ..no_window()
        };

        let report = collect(dir.path(), &options).unwrap();
        assert_eq!(report.deleted_artifacts, vec![stale.clone()]);
        assert!(stale.exists());
        assert!(JobFile::path_for(&stale).exists());
    }

    #[test]
    fn purge_keeps_directories() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.wav");
        fs::write(&source, b"x").unwrap();
        let cache = dir.path().join("cache");
        let path = artifact(&cache, "kept.wav", vec![source], None);

        let options = GcOptions {
            level: GcLevel::Purge,
            ..GcOptions::default()
        };
        let report = collect(&cache, &options).unwrap();
        assert_eq!(report.deleted_artifacts.len(), 1);
        assert_eq!(report.deleted_job_files.len(), 1);
        assert!(!path.exists());
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(collect(&dir.path().join("nope"), &GcOptions::default()).is_err());
    }

    #[test]
    fn level_parse() {
        assert_eq!(GcLevel::parse("default"), Some(GcLevel::Default));
        assert_eq!(GcLevel::parse("purge"), Some(GcLevel::Purge));
        assert_eq!(GcLevel::parse("everything"), None);
    }
}
