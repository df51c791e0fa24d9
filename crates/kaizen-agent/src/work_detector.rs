//! Cheap pre-cycle work probe
//!
//! Runs before anything else a cycle would do. Consults only in-memory or
//! small persisted state: pending queue items, active goals, unresolved
//! troubles, and pending confirmations. No build is run here.

use crate::app::App;
use tracing::debug;

/// What the probe found
#[derive(Debug, Clone)]
pub struct WorkReport {
    pub has_work: bool,
    pub reason: String,
}

/// Probe for meaningful work
pub struct WorkDetector;

impl WorkDetector {
    pub async fn detect(app: &App) -> WorkReport {
        let pending = app.queue.pending_count().await;
        if pending > 0 {
            return found(format!("{} pending improvements", pending));
        }

        let goals = app.goals.active().await.len();
        if goals > 0 {
            return found(format!("{} active goals", goals));
        }

        let unresolved = app.troubles.unresolved().await.len();
        if unresolved > 0 {
            return found(format!("{} unresolved troubles", unresolved));
        }

        let confirmations = app.confirmations.pending_count().await;
        if confirmations > 0 {
            return found(format!("{} pending confirmations", confirmations));
        }

        debug!("Work detector found nothing to do");
        WorkReport {
            has_work: false,
            reason: "no pending improvements, goals, troubles, or confirmations".to_string(),
        }
    }
}

fn found(reason: String) -> WorkReport {
    debug!("Work detected: {}", reason);
    WorkReport {
        has_work: true,
        reason,
    }
}
