//! Job types tracked in the registry.
//!
//! A [`JobEntry`] tracks a job from the moment a worker is about to be
//! started until a caller or the janitor removes it. A [`Response`] is what
//! a client receives for any `process` request.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Identifier of a worker, used to check whether it is still alive.
pub type WorkerId = u64;

/// Final result of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The artifact was written at this path.
    Ok(PathBuf),
    /// The job failed with this message.
    Error(String),
}

/// A registry entry for an in-flight or recently finished job.
///
/// Entries are created by the scheduler on a cache and registry miss and
/// mutated only by their owning worker.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEntry {
    /// When the entry was inserted.
    pub started_at: SystemTime,
    /// Worker running the job. Unset until the worker is started.
    pub worker: Option<WorkerId>,
    /// Result, set once the job is finished.
    pub outcome: Option<JobOutcome>,
}

impl JobEntry {
    /// Creates an unfinished placeholder entry.
    pub fn placeholder() -> Self {
        Self {
            started_at: SystemTime::now(),
            worker: None,
            outcome: None,
        }
    }

    /// Returns true once the owning worker reported a result.
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Time elapsed since the entry was inserted.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.started_at).unwrap_or(Duration::ZERO)
    }

    /// Marks the job finished with the given outcome.
    pub fn finish(&mut self, outcome: JobOutcome) {
        self.outcome = Some(outcome);
    }

    /// The `details` message of a `wait` response for this entry.
    pub fn wait_message(&self) -> String {
        let secs = self
            .started_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        format!("Job started at {} (unix time)", secs)
    }
}

/// Kind of a client response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// `details` is a path or a signature.
    Ok,
    /// `details` is an error message.
    Error,
    /// The job is in progress; `details` says since when.
    Wait,
}

/// The response to a request: exactly one of ok, error or wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Kind of response.
    pub out: ResponseKind,
    /// Path, signature or message.
    pub details: String,
}

impl Response {
    /// Creates an `ok` response.
    pub fn ok(details: impl Into<String>) -> Self {
        Self {
            out: ResponseKind::Ok,
            details: details.into(),
        }
    }

    /// Creates an `error` response.
    pub fn error(details: impl Into<String>) -> Self {
        Self {
            out: ResponseKind::Error,
            details: details.into(),
        }
    }

    /// Creates a `wait` response.
    pub fn wait(details: impl Into<String>) -> Self {
        Self {
            out: ResponseKind::Wait,
            details: details.into(),
        }
    }

    /// Converts a finished job outcome into a response.
    pub fn from_outcome(outcome: &JobOutcome) -> Self {
        match outcome {
            JobOutcome::Ok(path) => Self::ok(path.to_string_lossy()),
            JobOutcome::Error(message) => Self::error(message.clone()),
        }
    }

    /// Returns true for `ok` responses.
    pub fn is_ok(&self) -> bool {
        self.out == ResponseKind::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_unfinished() {
        let entry = JobEntry::placeholder();
        assert!(!entry.is_finished());
        assert!(entry.worker.is_none());
        assert!(entry.wait_message().starts_with("Job started at"));
    }

    #[test]
    fn finish_sets_outcome() {
        let mut entry = JobEntry::placeholder();
        entry.finish(JobOutcome::Error("boom".to_string()));
        assert!(entry.is_finished());
        assert_eq!(Response::from_outcome(entry.outcome.as_ref().unwrap()), Response::error("boom"));
    }

    #[test]
    fn age_saturates_for_future_entries() {
        let mut entry = JobEntry::placeholder();
        entry.started_at = SystemTime::now() + Duration::from_secs(60);
        assert_eq!(entry.age(SystemTime::now()), Duration::ZERO);
    }

    #[test]
    fn response_serialization() {
        let json = serde_json::to_string(&Response::wait("later")).unwrap();
        assert_eq!(json, r#"{"out":"wait","details":"later"}"#);
        let json = serde_json::to_string(&Response::ok("/cache/a/abc.wav")).unwrap();
        assert!(json.contains(r#""out":"ok""#));
    }
}
