//! Request dispatch.
//!
//! The scheduler answers every `process` request with `ok`, `wait` or
//! `error`. It computes the request signature, serves cache hits, coalesces
//! identical in-flight requests through the registry, and otherwise starts a
//! worker thread that resolves the source, runs the stack and writes the
//! artifact.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::audio::Encoder;
use crate::cache::{ensure_parent, CacheStore};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, ErrorCode, Result};
use crate::modules::ModuleRegistry;
use crate::registry::{JobStore, MemoryJobStore, ModuleClaims, Workers};
use crate::types::{
    stack_to_value, JobEntry, JobOutcome, Mode, ProcessRequest, RequestDefaults, Response, Signature,
};

use super::caster::{self, CastJob};
use super::{pipeline, resolver};

/// Tunables of the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Cache root directory.
    pub cache_path: PathBuf,
    /// Output format when a request names none.
    pub cache_format: String,
    /// External encoder binary.
    pub encoder: String,
    /// Maximum nesting of forced-sync dispatches.
    pub max_depth: usize,
    /// Bound on a single wait for a module claim.
    pub module_wait: Duration,
    /// Interval at which sync callers poll a job they do not own.
    pub poll_interval: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            cache_path: config.effective_cache_path(),
            cache_format: config.cache_format.clone(),
            encoder: config.encoder.clone(),
            max_depth: config.max_depth,
            module_wait: config.module_wait(),
            poll_interval: config.poll_interval(),
        }
    }
}

struct Shared {
    settings: SchedulerSettings,
    cache: CacheStore,
    store: Arc<dyn JobStore>,
    workers: Arc<Workers>,
    claims: Arc<ModuleClaims>,
    modules: ModuleRegistry,
    encoder: Encoder,
    requests: AtomicU64,
}

/// Dispatches requests. Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Creates a scheduler with an in-memory registry.
    pub fn new(settings: SchedulerSettings, modules: ModuleRegistry) -> Result<Self> {
        Self::with_store(settings, modules, Arc::new(MemoryJobStore::new()))
    }

    /// Creates a scheduler over the given registry store.
    pub fn with_store(settings: SchedulerSettings, modules: ModuleRegistry, store: Arc<dyn JobStore>) -> Result<Self> {
        std::fs::create_dir_all(&settings.cache_path)
            .map_err(|e| DaemonError::io("create cache folder", &settings.cache_path, e))?;
        info!(
            cache = %settings.cache_path.display(),
            format = %settings.cache_format,
            modules = ?modules.names(),
            "scheduler ready"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                cache: CacheStore::new(settings.cache_path.clone()),
                encoder: Encoder::new(settings.encoder.clone()),
                store,
                workers: Arc::new(Workers::new()),
                claims: Arc::new(ModuleClaims::new()),
                modules,
                requests: AtomicU64::new(0),
                settings,
            }),
        })
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.shared.settings
    }

    pub fn cache(&self) -> &CacheStore {
        &self.shared.cache
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.shared.store
    }

    pub fn workers(&self) -> &Arc<Workers> {
        &self.shared.workers
    }

    pub fn claims(&self) -> &Arc<ModuleClaims> {
        &self.shared.claims
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.shared.modules
    }

    pub fn encoder(&self) -> &Encoder {
        &self.shared.encoder
    }

    /// Output format when a request names none.
    pub fn default_format(&self) -> &str {
        &self.shared.settings.cache_format
    }

    /// Number of `process` requests received since startup.
    pub fn request_count(&self) -> u64 {
        self.shared.requests.load(Ordering::Relaxed)
    }

    /// Answers a `status` request.
    pub fn status(&self) -> Response {
        Response::ok(format!(
            "processed {} requests since startup, {} jobs in the registry",
            self.request_count(),
            self.shared.store.len()
        ))
    }

    /// Answers a `process` request given as JSON. Never fails: errors become
    /// `error` responses.
    pub fn handle(&self, value: &Value) -> Response {
        self.shared.requests.fetch_add(1, Ordering::Relaxed);
        let result = ProcessRequest::from_value(value, &RequestDefaults::default())
            .and_then(|request| self.process(&request));
        match result {
            Ok(response) => response,
            Err(e) => {
                if e.code.is_validation() {
                    debug!(error = %e, "rejected request");
                } else {
                    error!(error = %e, "request failed");
                }
                Response::error(e.to_string())
            }
        }
    }

    /// Validates and dispatches a parsed top-level request.
    pub fn process(&self, request: &ProcessRequest) -> Result<Response> {
        request.file.check_access()?;
        if request.file.query_depth() > self.shared.settings.max_depth {
            return Err(DaemonError::depth_exceeded(self.shared.settings.max_depth));
        }
        self.dispatch(request, 0)
    }

    /// Signature of a request, as `mode=hash` reports it.
    pub fn signature_of(&self, request: &ProcessRequest) -> Signature {
        request.signature(self.default_format())
    }

    /// Dispatches a request at nesting `depth`.
    pub(crate) fn dispatch(&self, request: &ProcessRequest, depth: usize) -> Result<Response> {
        if depth > self.shared.settings.max_depth {
            return Err(DaemonError::depth_exceeded(self.shared.settings.max_depth));
        }
        let sig = self.signature_of(request);
        if request.mode == Mode::Hash {
            return Ok(Response::ok(sig.as_str()));
        }

        let target = self
            .shared
            .cache
            .job_path(&sig, request.effective_format(self.default_format()));
        let store = &self.shared.store;

        loop {
            match store.get(&sig) {
                Some(entry) => match &entry.outcome {
                    Some(JobOutcome::Ok(path)) => {
                        if CacheStore::is_readable(path) {
                            debug!(job = %sig, "registry hit");
                            self.shared.cache.touch(path);
                            return Ok(Response::ok(path.to_string_lossy()));
                        }
                        // Removed out of band since it finished.
                        store.remove_if(&sig, &|e| e.is_finished());
                    }
                    Some(JobOutcome::Error(message)) => return Ok(Response::error(message.clone())),
                    None if request.mode == Mode::Async => return Ok(Response::wait(entry.wait_message())),
                    None => {
                        if let Some(worker) = entry.worker {
                            if !self.shared.workers.is_alive(worker) {
                                warn!(job = %sig, worker, "worker died before finishing; dispatching again");
                                store.remove_if(&sig, &|e| !e.is_finished() && e.worker == Some(worker));
                                continue;
                            }
                        }
                        thread::sleep(self.shared.settings.poll_interval);
                    }
                },
                None => {
                    if CacheStore::is_readable(&target) {
                        debug!(job = %sig, "cache hit");
                        self.shared.cache.touch(&target);
                        return Ok(Response::ok(target.to_string_lossy()));
                    }
                    if store.insert_if_absent(&sig, JobEntry::placeholder()) {
                        return self.start(request, sig, target, depth);
                    }
                }
            }
        }
    }

    /// Runs a job whose placeholder entry this caller inserted.
    fn start(&self, request: &ProcessRequest, sig: Signature, target: PathBuf, depth: usize) -> Result<Response> {
        let guard = self.shared.workers.register();
        let worker = guard.id();
        self.shared.store.update(&sig, &mut |e| e.worker = Some(worker));
        info!(job = %sig, worker, mode = ?request.mode, "starting job");

        let artifact = target.clone();
        let this = self.clone();
        let job = request.clone();
        let job_sig = sig.clone();
        let spawned = thread::Builder::new()
            .name(format!("job-{}", &sig.as_str()[..12]))
            .spawn(move || {
                let _guard = guard;
                this.run(&job, &job_sig, &target, depth);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.store.remove(&sig);
                return Err(DaemonError::with_source(
                    ErrorCode::WorkerLost,
                    format!("Could not start a worker for job {}", sig),
                    e,
                ));
            }
        };

        if request.mode == Mode::Async {
            let started = self.shared.store.get(&sig).map(|e| e.wait_message()).unwrap_or_default();
            return Ok(Response::wait(started));
        }

        let joined = handle.join();
        // Failed entries stay so concurrent pollers get the stored error; the
        // janitor evicts them after the grace window.
        let outcome = match self.shared.store.remove_if(&sig, &|e| matches!(e.outcome, Some(JobOutcome::Ok(_)))) {
            Some(entry) => entry.outcome,
            None => self.shared.store.get(&sig).and_then(|e| e.outcome),
        };
        match (joined, outcome) {
            (Ok(()), Some(outcome)) => Ok(Response::from_outcome(&outcome)),
            // Evicted by the janitor between the join and the lookup.
            (Ok(()), None) if CacheStore::is_readable(&artifact) => {
                debug!(job = %sig, "entry already evicted; serving the artifact");
                Ok(Response::ok(artifact.to_string_lossy()))
            }
            _ => {
                self.shared.store.remove_if(&sig, &|e| !e.is_finished());
                Err(DaemonError::worker_lost(sig.as_str()))
            }
        }
    }

    /// Worker body: produces the artifact and records the outcome.
    fn run(&self, request: &ProcessRequest, sig: &Signature, target: &Path, depth: usize) {
        let outcome = match self.execute(request, target, depth) {
            Ok(()) => {
                info!(job = %sig, artifact = %target.display(), "job finished");
                JobOutcome::Ok(target.to_path_buf())
            }
            Err(e) => {
                error!(job = %sig, error = %e, "job failed");
                JobOutcome::Error(e.to_string())
            }
        };
        self.shared.store.update(sig, &mut |e| e.finish(outcome.clone()));
    }

    fn execute(&self, request: &ProcessRequest, target: &Path, depth: usize) -> Result<()> {
        let resolved = resolver::resolve(self, &request.file, depth, request.cache)?;
        let processed = pipeline::run(self, &resolved, &request.stack, depth, request.cache)?;

        ensure_parent(target)?;
        caster::cast(
            self.cache(),
            self.encoder(),
            &CastJob {
                source: &processed.path,
                target,
                format: request.effective_format(self.default_format()),
                options: &request.format_options,
                sources: processed.sources,
                expiration: request.cache.expiration(),
                stack: stack_to_value(&request.stack),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{write_wav, AudioBuffer, WavEncoding};
    use crate::types::ResponseKind;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn scheduler(dir: &TempDir) -> Scheduler {
        let settings = SchedulerSettings {
            cache_path: dir.path().join("cache"),
            cache_format: "wav".to_string(),
            encoder: "ffmpeg".to_string(),
            max_depth: 2,
            module_wait: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        };
        Scheduler::new(settings, ModuleRegistry::with_builtins()).unwrap()
    }

    fn source(dir: &TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        write_wav(&AudioBuffer::new(vec![0.25; 1600], 16000, 1), &path, WavEncoding::intermediate()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn hash_mode_has_no_side_effects() {
        let dir = tempdir().unwrap();
        let sched = scheduler(&dir);
        let a = source(&dir, "a.wav");

        let response = sched.handle(&json!({ "file": a, "mode": "hash" }));
        assert!(response.is_ok());
        assert!(Signature::parse(&response.details).is_some());
        assert!(sched.store().is_empty());
        assert_eq!(std::fs::read_dir(sched.cache().root()).unwrap().count(), 0);
    }

    #[test]
    fn invalid_request_is_an_error() {
        let dir = tempdir().unwrap();
        let sched = scheduler(&dir);
        let response = sched.handle(&json!({ "file": dir.path().join("missing.wav") }));
        assert_eq!(response.out, ResponseKind::Error);
        assert!(response.details.contains("SOURCE_UNAVAILABLE"));
        assert!(sched.store().is_empty());
    }

    #[test]
    fn sync_job_writes_artifact_and_job_file() {
        let dir = tempdir().unwrap();
        let sched = scheduler(&dir);
        let a = source(&dir, "a.wav");

        let response = sched.handle(&json!({ "file": a, "stack": [{ "module": "time-reverse" }] }));
        assert!(response.is_ok(), "{:?}", response);
        let artifact = PathBuf::from(&response.details);
        assert!(artifact.starts_with(sched.cache().root()));
        assert!(crate::cache::JobFile::path_for(&artifact).exists());
        assert!(sched.store().is_empty());
        assert_eq!(sched.request_count(), 1);
    }

    #[test]
    fn unknown_module_names_position() {
        let dir = tempdir().unwrap();
        let sched = scheduler(&dir);
        let a = source(&dir, "a.wav");

        let response = sched.handle(&json!({
            "file": a,
            "stack": [{ "module": "pad" }, { "module": "vocoder" }]
        }));
        assert_eq!(response.out, ResponseKind::Error);
        assert!(response.details.contains("UNKNOWN_MODULE"));
        assert!(response.details.contains("position 1"));
    }

    #[test]
    fn nesting_beyond_max_depth_fails() {
        let dir = tempdir().unwrap();
        let sched = scheduler(&dir);
        let a = source(&dir, "a.wav");

        let response = sched.handle(&json!({ "file": { "file": { "file": { "file": a } } } }));
        assert_eq!(response.out, ResponseKind::Error);
        assert!(response.details.contains("DEPTH_EXCEEDED"));
    }

    #[test]
    fn status_reports_counts() {
        let dir = tempdir().unwrap();
        let sched = scheduler(&dir);
        sched.handle(&json!({ "file": 3 }));
        assert_eq!(
            sched.status().details,
            "processed 1 requests since startup, 0 jobs in the registry"
        );
    }

    /// Drops every entry as soon as it is finished, like a janitor sweep
    /// landing right after the worker reports.
    #[derive(Default)]
    struct EvictOnFinish(MemoryJobStore);

    impl JobStore for EvictOnFinish {
        fn get(&self, sig: &Signature) -> Option<JobEntry> {
            self.0.get(sig)
        }

        fn insert_if_absent(&self, sig: &Signature, entry: JobEntry) -> bool {
            self.0.insert_if_absent(sig, entry)
        }

        fn update(&self, sig: &Signature, f: &mut dyn FnMut(&mut JobEntry)) -> bool {
            let updated = self.0.update(sig, f);
            self.0.remove_if(sig, &|e| e.is_finished());
            updated
        }

        fn remove(&self, sig: &Signature) -> Option<JobEntry> {
            self.0.remove(sig)
        }

        fn remove_if(&self, sig: &Signature, predicate: &dyn Fn(&JobEntry) -> bool) -> Option<JobEntry> {
            self.0.remove_if(sig, predicate)
        }

        fn keys(&self) -> Vec<Signature> {
            self.0.keys()
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn sync_job_survives_early_eviction() {
        let dir = tempdir().unwrap();
        let settings = SchedulerSettings {
            cache_path: dir.path().join("cache"),
            cache_format: "wav".to_string(),
            encoder: "ffmpeg".to_string(),
            max_depth: 2,
            module_wait: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        };
        let store: Arc<dyn JobStore> = Arc::new(EvictOnFinish::default());
        let sched = Scheduler::with_store(settings, ModuleRegistry::with_builtins(), store).unwrap();
        let a = source(&dir, "a.wav");

        let response = sched.handle(&json!({ "file": a, "stack": [{ "module": "time-reverse" }] }));
        assert!(response.is_ok(), "{:?}", response);
        assert!(Path::new(&response.details).exists());
    }

    #[test]
    fn failed_sync_job_keeps_its_entry() {
        let dir = tempdir().unwrap();
        let sched = scheduler(&dir);
        let a = source(&dir, "a.wav");
        let request = json!({ "file": a, "stack": [{ "module": "resample" }] });

        let first = sched.handle(&request);
        assert_eq!(first.out, ResponseKind::Error);
        assert_eq!(sched.store().len(), 1);

        let again = sched.handle(&request);
        assert_eq!(again, first);
    }
}
