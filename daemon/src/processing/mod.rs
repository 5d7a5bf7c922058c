//! Request processing.
//!
//! The [`Scheduler`] dispatches requests; workers resolve their source with
//! the [`resolver`], apply the stack with the [`pipeline`] and write the
//! final artifact with the [`caster`].

pub mod caster;
pub mod pipeline;
pub mod resolver;
pub mod scheduler;

// Re-export commonly used types
pub use caster::{cast, CastJob};
pub use pipeline::Processed;
pub use resolver::Resolved;
pub use scheduler::{Scheduler, SchedulerSettings};
