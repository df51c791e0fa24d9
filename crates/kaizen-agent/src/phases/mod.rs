//! The eight-phase cycle pipeline
//!
//! Phases are pure readers of the workspace and cooperative writers of the
//! cycle context. They may run subprocesses and call the AI provider, but
//! they touch repositories only through the container's declared
//! interfaces.

mod error_detect;
mod health_check;
mod implement;
mod improve_find;
mod plan;
mod search;
mod test_gen;
mod verify;

pub use error_detect::ErrorDetectPhase;
pub use health_check::HealthCheckPhase;
pub use implement::ImplementPhase;
pub use improve_find::ImproveFindPhase;
pub use plan::PlanPhase;
pub use search::SearchPhase;
pub use test_gen::TestGenPhase;
pub use verify::VerifyPhase;

use crate::app::App;
use crate::context::CycleContext;
use async_trait::async_trait;
use kaizen_common::PhaseKind;

/// What a phase reports back to the orchestrator
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub success: bool,
    pub should_stop: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl PhaseResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            should_stop: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            should_stop: false,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Successful, but the pipeline should stop here (the no-op path)
    pub fn stop(message: impl Into<String>) -> Self {
        Self {
            success: true,
            should_stop: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_stop: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn fail_stop(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_stop: true,
            message: message.into(),
            data: None,
        }
    }
}

/// One stage of the pipeline
#[async_trait]
pub trait Phase: Send + Sync {
    fn kind(&self) -> PhaseKind;

    async fn execute(&self, app: &App, ctx: &mut CycleContext) -> PhaseResult;
}

/// The fixed pipeline, in execution order
pub fn default_pipeline() -> Vec<Box<dyn Phase>> {
    vec![
        Box::new(HealthCheckPhase),
        Box::new(ErrorDetectPhase),
        Box::new(ImproveFindPhase),
        Box::new(SearchPhase),
        Box::new(PlanPhase),
        Box::new(ImplementPhase),
        Box::new(TestGenPhase),
        Box::new(VerifyPhase),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_order_matches_phase_order() {
        let pipeline = default_pipeline();
        let kinds: Vec<PhaseKind> = pipeline.iter().map(|p| p.kind()).collect();
        assert_eq!(kinds, PhaseKind::ALL.to_vec());
    }
}
