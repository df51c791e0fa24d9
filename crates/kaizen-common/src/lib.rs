//! Common types and utilities for the Kaizen self-improvement agent
//!
//! This crate provides the shared data model, error taxonomy, configuration
//! tree, event bus, and persistence primitives used across all components of
//! the agent.

pub mod config;
pub mod error;
pub mod events;
pub mod store;
pub mod types;
pub mod util;

pub use config::AgentConfig;
pub use error::{Error, ErrorKind, Result};
pub use events::{AgentEvent, EventBus};
pub use store::{AtomicStore, LazyStore};
pub use types::*;
