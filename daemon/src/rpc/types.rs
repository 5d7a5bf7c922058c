//! Wire types of the line protocol.
//!
//! Each request is one JSON object on one line with an `action` field. Each
//! response is one [`Response`] object on one line.

use serde_json::Value;

use crate::types::Response;

/// Actions understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Report request and registry counters.
    Status,
    /// Process a stack request.
    Process,
}

impl Action {
    /// Reads the `action` field of a request.
    pub fn from_request(request: &Value) -> Result<Self, Response> {
        match request.get("action") {
            Some(Value::String(action)) => match action.as_str() {
                "status" => Ok(Action::Status),
                "process" => Ok(Action::Process),
                other => Err(Response::error(format!("unknown action '{}'", other))),
            },
            Some(other) => Err(Response::error(format!("'action' must be a string (got {})", other))),
            None => Err(Response::error("the 'action' field is missing")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Status => "status",
            Action::Process => "process",
        }
    }
}

/// Serializes a response as one protocol line, without the newline.
pub fn to_line(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_default()
}
