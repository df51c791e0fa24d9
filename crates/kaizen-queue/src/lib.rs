//! Persistent work queues and trouble capture for the Kaizen agent
//!
//! This crate owns the priority-ordered improvement queue, the append-only
//! trouble repository with rotation, the per-cycle trouble collector, and
//! the build/test output parsers that turn subprocess output into
//! structured records.

pub mod improvement_queue;
pub mod parse;
pub mod trouble_collector;
pub mod trouble_repository;

pub use improvement_queue::{ImprovementQueue, NewImprovement};
pub use parse::{parse_build_errors, parse_test_output, BuildErrorLine};
pub use trouble_collector::{NewTrouble, TroubleCollector};
pub use trouble_repository::TroubleRepository;
