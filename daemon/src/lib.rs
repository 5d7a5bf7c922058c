//! vt-daemon: audio processing stacks with a content-addressed result cache.
//!
//! Clients send JSON requests naming a source (a file, a nested request or a
//! list of either) and a stack of processing modules. The daemon answers with
//! the path of a cached artifact, computing it at most once per signature.
//!
//! # Modules
//!
//! - [`types`]: Requests, signatures, registry entries and responses
//! - [`config`]: Runtime configuration (DaemonConfig)
//! - [`error`]: Error types and codes (DaemonError, ErrorCode)
//! - [`audio`]: WAV I/O, concatenation and the external encoder
//! - [`modules`]: The module contract and the built-in modules
//! - [`cache`]: Cache layout, job files and garbage collection
//! - [`registry`]: In-flight jobs, module claims and the janitor
//! - [`processing`]: Scheduler, resolver, pipeline and caster
//! - [`rpc`]: Line-delimited JSON over TCP
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use vt_daemon::{DaemonConfig, ModuleRegistry, Scheduler, SchedulerSettings};
//!
//! let config = DaemonConfig::default();
//! let scheduler = Scheduler::new(SchedulerSettings::from_config(&config), ModuleRegistry::with_builtins())?;
//!
//! let response = scheduler.handle(&json!({
//!     "file": "/music/a.wav",
//!     "stack": [{ "module": "pad", "before": 0.5, "after": 0.5 }],
//!     "mode": "sync",
//! }));
//! println!("{}", response.details);
//! ```

pub mod audio;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod modules;
pub mod processing;
pub mod registry;
pub mod rpc;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use config::DaemonConfig;
pub use error::{DaemonError, ErrorCode, Result};
pub use modules::{Module, ModuleRegistry};
pub use processing::{Scheduler, SchedulerSettings};
pub use types::{ProcessRequest, Response, ResponseKind, Signature};
