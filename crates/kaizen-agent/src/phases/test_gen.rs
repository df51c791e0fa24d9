//! Phase 7 — test generation for the cycle's changes
//!
//! Every modified non-test source file gets a companion test file under the
//! project's `tests/` directory, produced through the same generate →
//! sanitize → retry pipeline as the implementation phase.

use crate::app::App;
use crate::context::CycleContext;
use crate::phases::{Phase, PhaseResult};
use crate::scan;
use crate::writer::safe_write;
use async_trait::async_trait;
use kaizen_common::util::truncate;
use kaizen_common::{AgentEvent, Change, ChangeType, PhaseKind};
use kaizen_provider::sanitize::{extract_code_block, scrub_control_sequences, validate_artifact};
use kaizen_provider::CompletionRequest;
use std::path::Path;
use tracing::{debug, warn};

/// Generates tests next to the cycle's modified sources
pub struct TestGenPhase;

#[async_trait]
impl Phase for TestGenPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::TestGen
    }

    async fn execute(&self, app: &App, ctx: &mut CycleContext) -> PhaseResult {
        let candidates: Vec<String> = ctx
            .implemented_changes
            .iter()
            .filter(|change| change.change_type != ChangeType::Delete)
            .map(|change| change.file.clone())
            .filter(|file| {
                let path = Path::new(file);
                !scan::is_test_file(path)
                    && path
                        .extension()
                        .map(|e| scan::SOURCE_EXTENSIONS.contains(&e.to_string_lossy().as_ref()))
                        .unwrap_or(false)
            })
            .collect();

        if candidates.is_empty() {
            return PhaseResult::ok("no modified sources need tests");
        }

        let mut generated = 0usize;
        let mut failures: Vec<String> = Vec::new();
        for file in candidates {
            match self.generate_test(app, ctx, &file).await {
                Ok(true) => generated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Test generation for {} failed: {}", file, e);
                    failures.push(format!("{}: {}", file, e));
                }
            }
        }

        if failures.is_empty() {
            PhaseResult::ok(format!("{} test files generated", generated))
        } else {
            // Test generation is not a critical phase; the failure is
            // recorded but the pipeline continues to verification.
            PhaseResult::fail(failures.join("; "))
        }
    }
}

impl TestGenPhase {
    async fn generate_test(
        &self,
        app: &App,
        ctx: &mut CycleContext,
        source_file: &str,
    ) -> kaizen_common::Result<bool> {
        let source_path = Path::new(source_file);
        let stem = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string());
        let extension = source_path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let test_file = format!("tests/{}_test.{}", stem, extension);

        let Ok(source_content) =
            tokio::fs::read_to_string(app.config.project_dir.join(source_file)).await
        else {
            debug!("Source {} unreadable, skipping test generation", source_file);
            return Ok(false);
        };

        let mut prompt = format!(
            "Write a test file for the following source file.\n\
             Source path: {}\nTest path: {}\n\
             Cover the observable behavior; keep the project's language and conventions.\n\
             Output only the test file content.\n\n```\n{}\n```",
            source_file,
            test_file,
            truncate(&source_content, 4000)
        );

        for _attempt in 1..=app.config.limits.max_generation_attempts {
            ctx.ai_calls += 1;
            let (completion, _served_by) = app
                .providers
                .complete(&CompletionRequest::new(prompt.clone()))
                .await?;
            ctx.token_usage.add(completion.usage);

            let artifact = extract_code_block(&scrub_control_sequences(&completion.text));
            let report = validate_artifact(&extension, &artifact);
            if !report.valid {
                prompt = format!(
                    "{}\n\nYour previous attempt was rejected: {}. Produce the complete corrected test file.",
                    prompt,
                    report.problems.join(", ")
                );
                continue;
            }

            let outcome = safe_write(
                app,
                &test_file,
                &artifact,
                &format!("tests for {}", source_file),
            )
            .await?;
            app.events.emit(AgentEvent::Modification {
                cycle_id: ctx.cycle_id.clone(),
                file: outcome.path.clone(),
                change_type: outcome.change_type,
            });
            ctx.implemented_changes.push(Change {
                file: outcome.path,
                change_type: outcome.change_type,
                summary: Some(format!("tests for {}", source_file)),
                related_issue: None,
            });
            return Ok(true);
        }

        Err(kaizen_common::Error::Validation(format!(
            "Could not produce a valid test file for {}",
            source_file
        )))
    }
}
