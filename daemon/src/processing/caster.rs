//! Output casting: turns the last intermediate into the requested format at
//! the job's final path, and writes its job file.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::audio::{encoding_of, read_wav, write_wav, Encoder, WavEncoding};
use crate::cache::{commit, temp_path_for, CacheStore, JobFile};
use crate::error::{DaemonError, Result};
use crate::types::{extension_of, Expiration};

/// Everything the caster needs for one job.
#[derive(Debug)]
pub struct CastJob<'a> {
    /// Last intermediate file.
    pub source: &'a Path,
    /// Final artifact path.
    pub target: &'a Path,
    /// Requested output extension.
    pub format: &'a str,
    /// Encoder options.
    pub options: &'a Value,
    /// Literal files the artifact derives from.
    pub sources: BTreeSet<PathBuf>,
    pub expiration: Option<Expiration>,
    /// Stack of the job, for the job file.
    pub stack: Value,
}

/// How the output was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cast {
    Link,
    Copy,
    Wav,
    External,
}

/// Writes `job.target` and its job file.
pub fn cast(cache: &CacheStore, encoder: &Encoder, job: &CastJob<'_>) -> Result<()> {
    let tmp = temp_path_for(job.target);
    let result = write_output(cache, encoder, job, &tmp);
    let how = match result {
        Ok(how) => how,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };
    debug!(target = %job.target.display(), how = ?how, "cast output");

    JobFile::new(job.target, job.sources.iter().cloned(), job.expiration, job.stack.clone())?.write()?;
    commit(&tmp, job.target)
}

fn write_output(cache: &CacheStore, encoder: &Encoder, job: &CastJob<'_>, tmp: &Path) -> Result<Cast> {
    let same_format = extension_of(job.source) == job.format;

    if same_format && job.options.is_null() {
        // Only cache-owned files are hard-linked; user files are copied.
        if job.source.starts_with(cache.root()) && fs::hard_link(job.source, tmp).is_ok() {
            return Ok(Cast::Link);
        }
        fs::copy(job.source, tmp).map_err(|e| DaemonError::io("copy", job.source, e))?;
        return Ok(Cast::Copy);
    }

    if job.format == "wav" {
        let fallback = encoding_of(job.source)?;
        let encoding = WavEncoding::from_options(job.options, fallback)?;
        let buffer = read_wav(job.source)?;
        write_wav(&buffer, tmp, encoding)?;
        return Ok(Cast::Wav);
    }

    encoder.encode(job.source, tmp, job.options)?;
    Ok(Cast::External)
}
