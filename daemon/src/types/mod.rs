//! Core types for the vt-daemon.
//!
//! This module re-exports all the core data types used throughout the daemon:
//! - [`ProcessRequest`]: A parsed request with its recursive [`Source`]
//! - [`Signature`]: The deterministic content-address of a request
//! - [`JobEntry`]: A registry entry for an in-flight job
//! - [`Response`]: The ok / error / wait answer sent to clients

mod job;
mod request;
mod signature;

// Re-export all types at the module level
pub use job::{JobEntry, JobOutcome, Response, ResponseKind, WorkerId};
pub use request::{
    absolutize, check_source_file, concat_signature, extension_of, stack_to_value, CachePolicy,
    Expiration, Mode, ModuleInvocation, ProcessRequest, RequestDefaults, Source, Stack, StackSpec,
    MAX_CACHE_HOURS, SUPPORTED_SOURCE_EXTENSIONS,
};
pub use signature::{canonical_json, signature, Signature, SIGNATURE_LEN};
