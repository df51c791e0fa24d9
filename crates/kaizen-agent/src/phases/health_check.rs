//! Phase 1 — environment health signals

use crate::app::App;
use crate::context::CycleContext;
use crate::phases::{Phase, PhaseResult};
use async_trait::async_trait;
use kaizen_common::PhaseKind;
use kaizen_safety::BreakerState;
use serde_json::json;
use tracing::warn;

/// Collects environment signals; stops the pipeline on severe degradation
pub struct HealthCheckPhase;

#[async_trait]
impl Phase for HealthCheckPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::HealthCheck
    }

    async fn execute(&self, app: &App, _ctx: &mut CycleContext) -> PhaseResult {
        let project_dir = &app.config.project_dir;
        if !project_dir.is_dir() {
            return PhaseResult::fail_stop(format!(
                "Project directory {} does not exist",
                project_dir.display()
            ));
        }

        // A workspace that cannot be written means no store survives the
        // cycle; treat it as severe.
        if let Err(e) = tokio::fs::create_dir_all(&app.config.workspace_dir).await {
            return PhaseResult::fail_stop(format!(
                "Workspace {} is not writable: {}",
                app.config.workspace_dir.display(),
                e
            ));
        }

        let pending_improvements = app.queue.pending_count().await;
        let unresolved_troubles = app.troubles.unresolved().await.len();
        let active_goals = app.goals.active().await.len();
        let breaker_state = app.breaker.state().await;

        if breaker_state == BreakerState::Open {
            warn!("Repair circuit breaker is open during health check");
        }

        PhaseResult::ok_with(
            format!(
                "healthy: {} pending improvements, {} unresolved troubles, {} goals",
                pending_improvements, unresolved_troubles, active_goals
            ),
            json!({
                "pending_improvements": pending_improvements,
                "unresolved_troubles": unresolved_troubles,
                "active_goals": active_goals,
                "breaker_open": breaker_state == BreakerState::Open,
            }),
        )
    }
}
