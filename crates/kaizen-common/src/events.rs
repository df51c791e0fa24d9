//! Typed event bus for cycle observability
//!
//! Events are emitted synchronously in pipeline order. Subscribers are
//! registered once at startup; handlers must be cheap and must not block.

use crate::types::{ChangeType, CycleId, Issue, PhaseKind};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Every event the agent emits, one variant per kind
#[derive(Debug, Clone)]
pub enum AgentEvent {
    CycleStarted {
        cycle_id: CycleId,
    },
    CycleCompleted {
        cycle_id: CycleId,
        success: bool,
    },
    PhaseStarted {
        cycle_id: CycleId,
        phase: PhaseKind,
    },
    PhaseCompleted {
        cycle_id: CycleId,
        phase: PhaseKind,
        success: bool,
    },
    IssueDetected {
        cycle_id: CycleId,
        issue: Issue,
    },
    Modification {
        cycle_id: CycleId,
        file: String,
        change_type: ChangeType,
    },
    Rollback {
        cycle_id: CycleId,
        reason: String,
    },
    TroubleCaptured {
        cycle_id: CycleId,
        trouble_id: String,
        category: String,
    },
    Error {
        message: String,
    },
}

impl AgentEvent {
    /// Event name for logs and external observers
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::CycleStarted { .. } => "cycle_started",
            AgentEvent::CycleCompleted { .. } => "cycle_completed",
            AgentEvent::PhaseStarted { .. } => "phase_started",
            AgentEvent::PhaseCompleted { .. } => "phase_completed",
            AgentEvent::IssueDetected { .. } => "issue_detected",
            AgentEvent::Modification { .. } => "modification",
            AgentEvent::Rollback { .. } => "rollback",
            AgentEvent::TroubleCaptured { .. } => "trouble_captured",
            AgentEvent::Error { .. } => "error",
        }
    }
}

type Handler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Synchronous in-process event bus
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Handler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for all events
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Arc::new(handler));
    }

    /// Emit an event to every subscriber, in registration order
    pub fn emit(&self, event: AgentEvent) {
        debug!("event: {}", event.name());
        let subscribers = self.subscribers.read();
        for handler in subscribers.iter() {
            handler(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            bus.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(AgentEvent::CycleStarted {
            cycle_id: "cycle_test".into(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_names() {
        let event = AgentEvent::Rollback {
            cycle_id: "c".into(),
            reason: "tests failed".into(),
        };
        assert_eq!(event.name(), "rollback");
    }
}
