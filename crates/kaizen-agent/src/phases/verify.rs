//! Phase 8 — verification via the verifier

use crate::app::App;
use crate::context::CycleContext;
use crate::phases::{Phase, PhaseResult};
use crate::verifier::Verifier;
use async_trait::async_trait;
use kaizen_common::PhaseKind;
use serde_json::json;

/// Runs build, tests, auto-repair, and commit through the verifier
pub struct VerifyPhase;

#[async_trait]
impl Phase for VerifyPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Verify
    }

    async fn execute(&self, app: &App, ctx: &mut CycleContext) -> PhaseResult {
        let verifier = Verifier::new(app);
        let max_retries = app.config.limits.max_verify_retries;

        match verifier.verify_with_retry(ctx, max_retries).await {
            Ok(result) => {
                let data = json!({
                    "build_passed": result.build_passed,
                    "tests_passed": result.tests_passed,
                    "committed": result.committed,
                    "commit_hash": result.commit_hash,
                    "pushed": result.pushed,
                    "rolled_back": result.rolled_back,
                    "fixes_applied": result.fixes_applied,
                });
                if result.build_passed && result.tests_passed {
                    PhaseResult::ok_with(
                        match &result.commit_hash {
                            Some(hash) => format!("verified and committed ({})", hash),
                            None => "verified".to_string(),
                        },
                        data,
                    )
                } else {
                    let mut message = String::from("verification failed");
                    if !result.build_passed {
                        message.push_str(": build errors remain");
                    } else {
                        message.push_str(": tests failed");
                    }
                    if result.rolled_back {
                        message.push_str(" (rolled back)");
                    }
                    PhaseResult {
                        success: false,
                        should_stop: false,
                        message,
                        data: Some(data),
                    }
                }
            }
            Err(e) => PhaseResult::fail(format!("verifier error: {}", e)),
        }
    }
}
