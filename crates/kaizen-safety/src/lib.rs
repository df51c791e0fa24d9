//! Safety layer for the Kaizen agent
//!
//! Everything that keeps an autonomous code-writing loop from hurting its
//! host: the policy guard for paths, changes, and generated content; the
//! dual-provider AI security review; workspace snapshots for rollback; and
//! the circuit breaker that halts repair attempts after repeated failures.

pub mod circuit_breaker;
pub mod guard;
pub mod review;
pub mod snapshot;

pub use circuit_breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use guard::{ContentReport, Guard, GuardConfig, PathErrorKind, PathValidation};
pub use review::{ReviewDecision, SecurityReviewer};
pub use snapshot::{SnapshotManager, SnapshotMeta};
