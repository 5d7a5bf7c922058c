//! Stack execution with a per-module sub-cache.
//!
//! Each stack item is applied to the output of the previous one. A module
//! application is identified by its own signature over the module name, the
//! current source and the parameters, so identical applications are shared
//! across jobs and stacks. Concurrent workers needing the same application
//! coordinate through [`ModuleClaims`](crate::registry::ModuleClaims).
//!
//! Generators ignore the current source: their signature leaves it out and
//! their output derives only from the files they report.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cache::{commit, ensure_parent, temp_path_for, CacheStore, JobFile};
use crate::error::{DaemonError, Result};
use crate::modules::{ModuleInput, ModuleKind};
use crate::registry::Acquire;
use crate::types::{signature, CachePolicy, Expiration, ModuleInvocation};

use super::resolver::{NestedFiles, Resolved};
use super::scheduler::Scheduler;

/// Output of a stack: the last file and every file it derives from.
#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    pub path: PathBuf,
    pub sources: BTreeSet<PathBuf>,
}

/// What goes into the job file of a cached intermediate.
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub sources: BTreeSet<PathBuf>,
    pub expiration: Option<Expiration>,
    pub stack: Value,
}

/// Applies `stack` to a resolved source.
pub fn run(
    sched: &Scheduler,
    resolved: &Resolved,
    stack: &[ModuleInvocation],
    depth: usize,
    cache: CachePolicy,
) -> Result<Processed> {
    let mut current = resolved.path.clone();
    let mut sources = resolved.sources.clone();

    for (position, invocation) in stack.iter().enumerate() {
        let name = invocation.module.as_str();
        let module = sched
            .modules()
            .get(name)
            .ok_or_else(|| DaemonError::unknown_module(name, position))?;

        let kind = module.kind();
        let (input, inherited) = match kind {
            ModuleKind::Modifier => (Value::from(current.to_string_lossy()), sources.clone()),
            ModuleKind::Generator => (Value::Null, BTreeSet::new()),
        };
        let msig = signature(&json!(["module", name, input, Value::Object(invocation.params.clone())]));
        let target = sched.cache().module_path(name, &msig, "wav");
        let record = ArtifactRecord {
            sources: inherited,
            expiration: cache.expiration(),
            stack: json!([invocation.to_value()]),
        };
        let files = NestedFiles { sched, depth, cache };
        let key = format!("{}/{}", name, msig);

        let produced = cached_artifact(sched, &key, &target, record, |tmp| {
            debug!(module = name, position, ?kind, source = %current.display(), "running module");
            module
                .process(&ModuleInput {
                    source: &current,
                    params: &invocation.params,
                    target: tmp,
                    files: &files,
                })
                .map(|output| output.consumed_sources)
        })
        .map_err(|e| DaemonError::module_failed(name, position, &current, e))?;

        // `produced` already includes what a modifier inherited.
        sources = produced;
        current = target;
    }

    Ok(Processed {
        path: current,
        sources,
    })
}

/// Returns the source set of the artifact at `target`, computing it with
/// `produce` unless it is already cached.
///
/// `produce` writes into a temporary path and returns the files it consumed.
/// At most one worker runs `produce` for a given `key` at a time; the others
/// wait on its claim and re-check the cache.
pub(crate) fn cached_artifact<F>(
    sched: &Scheduler,
    key: &str,
    target: &Path,
    record: ArtifactRecord,
    produce: F,
) -> Result<BTreeSet<PathBuf>>
where
    F: FnOnce(&Path) -> Result<Vec<PathBuf>>,
{
    let guard = loop {
        if CacheStore::is_readable(target) {
            return Ok(reuse(sched, target, record));
        }
        match sched.claims().acquire(key) {
            Acquire::Owner(guard) => break guard,
            Acquire::Busy(claim) => {
                debug!(key, "waiting for another worker");
                claim.wait_for(sched.settings().module_wait);
            }
        }
    };
    // Finished between the check and the claim.
    if CacheStore::is_readable(target) {
        guard.finish();
        return Ok(reuse(sched, target, record));
    }

    ensure_parent(target)?;
    let tmp = temp_path_for(target);
    let consumed = match produce(&tmp) {
        Ok(consumed) => consumed,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };

    let mut sources = record.sources;
    sources.extend(consumed);
    JobFile::new(target, sources.iter().cloned(), record.expiration, record.stack)?.write()?;
    commit(&tmp, target)?;
    guard.finish();
    info!(artifact = %target.display(), "cached intermediate");
    Ok(sources)
}

fn reuse(sched: &Scheduler, target: &Path, record: ArtifactRecord) -> BTreeSet<PathBuf> {
    debug!(artifact = %target.display(), "reusing intermediate");
    sched.cache().touch(target);
    match JobFile::load_for(target) {
        Ok(job) => job.source_files,
        Err(_) => record.sources,
    }
}
