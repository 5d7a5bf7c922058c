//! Content-addressed artifact cache.
//!
//! Provides the on-disk layout of artifacts, their job files, and the
//! offline garbage collector.

pub mod gc;
pub mod job_file;
pub mod store;

// Re-export commonly used types
pub use gc::{collect, GcLevel, GcOptions, GcReport};
pub use job_file::{JobFile, JOB_FILE_EXTENSION};
pub use store::{atomic_write, commit, ensure_parent, temp_path_for, CacheStore};
