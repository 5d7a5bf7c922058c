//! Job registry and module claims.
//!
//! The registry tracks in-flight jobs by signature so identical requests are
//! computed once. Module claims do the same for module sub-cache artifacts.
//! The janitor evicts what callers leave behind.

pub mod janitor;
pub mod module_claims;
pub mod store;
pub mod workers;

// Re-export commonly used types
pub use janitor::{sweep, Janitor, SweepReport};
pub use module_claims::{Acquire, ClaimGuard, ClaimState, ModuleClaim, ModuleClaims};
pub use store::{JobStore, MemoryJobStore};
pub use workers::{WorkerGuard, Workers};
