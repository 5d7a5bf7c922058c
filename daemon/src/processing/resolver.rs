//! Resolution of a request's `file` into one ready sound file.
//!
//! Literal paths are used as they are. Nested queries are dispatched in
//! forced-sync mode one level deeper. Lists are resolved element by element
//! and concatenated; the concatenation is cached under a signature built from
//! the element signatures, so it is shared by every stack applied to it.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde_json::{json, Value};
use tracing::debug;

use crate::audio::{concatenate_files, write_wav, WavEncoding};
use crate::cache::JobFile;
use crate::error::{DaemonError, ErrorCode, Result};
use crate::modules::{FileResolver, ResolvedFile};
use crate::types::{CachePolicy, ProcessRequest, RequestDefaults, ResponseKind, Source};

use super::pipeline::{cached_artifact, ArtifactRecord};
use super::scheduler::Scheduler;

/// A resolved source and the literal files it derives from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub path: PathBuf,
    pub sources: BTreeSet<PathBuf>,
}

/// Resolves `source` for a job running at nesting `depth`.
pub fn resolve(sched: &Scheduler, source: &Source, depth: usize, cache: CachePolicy) -> Result<Resolved> {
    match source {
        Source::Literal(path) => Ok(Resolved {
            path: path.clone(),
            sources: BTreeSet::from([path.clone()]),
        }),
        Source::Query(request) => resolve_query(sched, request, depth),
        Source::List(items) => {
            let parts = items
                .iter()
                .map(|item| resolve(sched, item, depth, cache))
                .collect::<Result<Vec<_>>>()?;

            let sig = source.signature(sched.default_format());
            let target = sched.cache().job_path(&sig, "wav");
            let files: Vec<PathBuf> = parts.iter().map(|p| p.path.clone()).collect();
            let record = ArtifactRecord {
                sources: parts.into_iter().flat_map(|p| p.sources).collect(),
                expiration: cache.expiration(),
                stack: json!([]),
            };
            debug!(concat = %sig, elements = files.len(), "concatenating");

            let sources = cached_artifact(sched, &format!("concat/{}", sig), &target, record, |tmp| {
                let joined = concatenate_files(&files)?;
                write_wav(&joined, tmp, WavEncoding::intermediate())?;
                Ok(Vec::new())
            })?;
            Ok(Resolved { path: target, sources })
        }
    }
}

/// Dispatches a nested query and returns its artifact.
fn resolve_query(sched: &Scheduler, request: &ProcessRequest, depth: usize) -> Result<Resolved> {
    let response = sched.dispatch(&request.as_sync(), depth + 1)?;
    match response.out {
        ResponseKind::Ok => {
            let path = PathBuf::from(response.details);
            let sources = match JobFile::load_for(&path) {
                Ok(job) => job.source_files,
                Err(_) => {
                    let mut literals = Vec::new();
                    request.file.literal_paths(&mut literals);
                    literals.into_iter().collect()
                }
            };
            Ok(Resolved { path, sources })
        }
        ResponseKind::Error => Err(DaemonError::new(
            ErrorCode::ModuleFailed,
            format!("Nested query failed: {}", response.details),
        )),
        ResponseKind::Wait => Err(DaemonError::new(
            ErrorCode::WorkerLost,
            format!("Nested query did not finish: {}", response.details),
        )),
    }
}

/// Resolves `file` parameters of modules within a running job.
pub struct NestedFiles<'a> {
    pub sched: &'a Scheduler,
    pub depth: usize,
    pub cache: CachePolicy,
}

impl FileResolver for NestedFiles<'_> {
    fn resolve_file(&self, value: &Value) -> Result<ResolvedFile> {
        let source = Source::from_value(value, &RequestDefaults { cache: self.cache })?;
        source.check_access()?;
        if self.depth + source.query_depth() > self.sched.settings().max_depth {
            return Err(DaemonError::depth_exceeded(self.sched.settings().max_depth));
        }
        let resolved = resolve(self.sched, &source, self.depth, self.cache)?;
        Ok(ResolvedFile {
            path: resolved.path,
            sources: resolved.sources.into_iter().collect(),
        })
    }
}
