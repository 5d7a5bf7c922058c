//! Action handlers.

use serde_json::Value;
use tracing::debug;

use crate::processing::Scheduler;
use crate::types::Response;

use super::types::Action;

/// Handles one decoded request.
pub fn handle_request(request: &Value, scheduler: &Scheduler) -> Response {
    let action = match Action::from_request(request) {
        Ok(action) => action,
        Err(response) => return response,
    };
    debug!(action = action.as_str(), "handling request");

    match action {
        Action::Status => handle_status(scheduler),
        Action::Process => handle_process(request, scheduler),
    }
}

/// Handles the status action.
fn handle_status(scheduler: &Scheduler) -> Response {
    scheduler.status()
}

/// Handles the process action. Blocks for `sync` requests.
fn handle_process(request: &Value, scheduler: &Scheduler) -> Response {
    scheduler.handle(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleRegistry;
    use crate::processing::SchedulerSettings;
    use crate::types::ResponseKind;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn scheduler(root: &std::path::Path) -> Scheduler {
        let settings = SchedulerSettings {
            cache_path: root.join("cache"),
            cache_format: "wav".to_string(),
            encoder: "ffmpeg".to_string(),
            max_depth: 4,
            module_wait: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        };
        Scheduler::new(settings, ModuleRegistry::with_builtins()).unwrap()
    }

    #[test]
    fn status_counts_process_requests() {
        let dir = tempdir().unwrap();
        let sched = scheduler(dir.path());

        let response = handle_request(&json!({ "action": "process", "file": 1 }), &sched);
        assert_eq!(response.out, ResponseKind::Error);

        let status = handle_request(&json!({ "action": "status" }), &sched);
        assert!(status.is_ok());
        assert!(status.details.starts_with("processed 1 requests"));
    }

    #[test]
    fn unknown_action_is_an_error() {
        let dir = tempdir().unwrap();
        let sched = scheduler(dir.path());
        let response = handle_request(&json!({ "action": "dance" }), &sched);
        assert_eq!(response.out, ResponseKind::Error);
        assert_eq!(sched.request_count(), 0);
    }
}
