//! Network listener for daemon communication.
//!
//! Serves line-delimited JSON over TCP with two actions:
//! - `status`: Request and registry counters
//! - `process`: Run a stack request

pub mod methods;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use methods::handle_request;
pub use server::{bind, run_server, serve, ServerState};
pub use types::{to_line, Action};
