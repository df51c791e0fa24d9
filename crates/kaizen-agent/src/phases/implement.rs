//! Phase 6 — execute the plan with generate/validate/retry
//!
//! Each plan step that names a file gets a whole-file artifact from the
//! provider. Artifacts pass the sanitizer (fence extraction, control
//! characters, bracket balance) before the guarded write; a rejected
//! artifact is retried with the validation problems folded into the
//! prompt. After the retry cap, a create falls back to a stub and a modify
//! leaves the file untouched and fails the step.

use crate::app::App;
use crate::context::CycleContext;
use crate::phases::{Phase, PhaseResult};
use crate::writer::safe_write;
use async_trait::async_trait;
use kaizen_common::util::truncate;
use kaizen_common::{AgentEvent, Change, Error, PhaseKind};
use kaizen_provider::sanitize::{extract_code_block, scrub_control_sequences, validate_artifact};
use kaizen_provider::{CompletionRequest, ServedBy};
use std::path::Path;
use tracing::{info, warn};

/// Applies the plan's file edits through the provider pipeline
pub struct ImplementPhase;

#[async_trait]
impl Phase for ImplementPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Implement
    }

    async fn execute(&self, app: &App, ctx: &mut CycleContext) -> PhaseResult {
        let Some(plan) = ctx.plan.clone() else {
            return PhaseResult::fail("no plan to implement");
        };

        let mut failures: Vec<String> = Vec::new();
        for step in plan.steps.iter().filter(|s| s.file.is_some()) {
            let file = step.file.clone().expect("filtered on file presence");
            match self.implement_step(app, ctx, &plan.description, &step.description, &file).await {
                Ok(()) => {}
                Err(e) => {
                    warn!("Step for {} failed: {}", file, e);
                    app.collector.capture_error("implement", &e).await;
                    failures.push(format!("{}: {}", file, e));
                }
            }
        }

        if failures.is_empty() {
            PhaseResult::ok(format!(
                "{} changes implemented",
                ctx.implemented_changes.len()
            ))
        } else {
            PhaseResult::fail(failures.join("; "))
        }
    }
}

impl ImplementPhase {
    async fn implement_step(
        &self,
        app: &App,
        ctx: &mut CycleContext,
        plan_description: &str,
        step_description: &str,
        file: &str,
    ) -> Result<(), Error> {
        let exists = app.config.project_dir.join(file).exists();
        let extension = Path::new(file)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        let context_block = ctx
            .search_results
            .as_ref()
            .filter(|s| s.target_file.as_deref() == Some(file))
            .and_then(|s| s.file_content.clone());

        let mut prompt = build_prompt(plan_description, step_description, file, context_block.as_deref());
        let max_attempts = app.config.limits.max_generation_attempts;

        for attempt in 1..=max_attempts {
            ctx.ai_calls += 1;
            let (completion, served_by) = app
                .providers
                .complete(&CompletionRequest::new(prompt.clone()))
                .await?;
            ctx.token_usage.add(completion.usage);

            let artifact = extract_code_block(&scrub_control_sequences(&completion.text));
            let report = validate_artifact(&extension, &artifact);
            if report.valid {
                self.write_artifact(app, ctx, file, &artifact, step_description, served_by)
                    .await?;
                return Ok(());
            }

            warn!(
                "Artifact for {} rejected (attempt {}/{}): {}",
                file,
                attempt,
                max_attempts,
                report.problems.join(", ")
            );
            prompt = format!(
                "{}\n\nYour previous attempt was rejected by validation: {}.\n\
                 Produce the complete corrected file.",
                prompt,
                report.problems.join(", ")
            );
        }

        // Terminal generation failure
        if exists {
            return Err(Error::Validation(format!(
                "Could not produce a valid rewrite of {} in {} attempts",
                file, max_attempts
            )));
        }
        let stub = stub_content(&extension, step_description);
        info!("Falling back to a stub for new file {}", file);
        self.write_artifact(app, ctx, file, &stub, step_description, ServedBy::Primary)
            .await
    }

    async fn write_artifact(
        &self,
        app: &App,
        ctx: &mut CycleContext,
        file: &str,
        content: &str,
        description: &str,
        served_by: ServedBy,
    ) -> Result<(), Error> {
        let outcome = safe_write(app, file, content, description).await?;

        app.events.emit(AgentEvent::Modification {
            cycle_id: ctx.cycle_id.clone(),
            file: outcome.path.clone(),
            change_type: outcome.change_type,
        });

        if served_by == ServedBy::Secondary && app.config.rate_limit_fallback.track_changes {
            ctx.fallback_files.push(outcome.path.clone());
            if let Err(e) = app
                .confirmations
                .record(
                    &ctx.cycle_id,
                    &outcome.path,
                    description,
                    &app.config.rate_limit_fallback.fallback_provider,
                )
                .await
            {
                warn!("Failed to record fallback confirmation: {}", e);
            }
        }

        let related_issue = ctx
            .plan
            .as_ref()
            .and_then(|p| p.target_issue.clone());
        ctx.implemented_changes.push(Change {
            file: outcome.path,
            change_type: outcome.change_type,
            summary: Some(truncate(description, 140)),
            related_issue,
        });
        Ok(())
    }
}

fn build_prompt(
    plan_description: &str,
    step_description: &str,
    file: &str,
    current_content: Option<&str>,
) -> String {
    let mut prompt = format!(
        "You are applying a planned change to one file of a project.\n\
         Plan: {}\nStep: {}\nFile: {}\n",
        plan_description, step_description, file
    );
    match current_content {
        Some(content) => {
            prompt.push_str(&format!(
                "Current content:\n```\n{}\n```\n\
                 Produce the complete updated file content. Output only the file content.",
                content
            ));
        }
        None => {
            prompt.push_str("The file does not exist yet. Produce its complete content. Output only the file content.");
        }
    }
    prompt
}

fn stub_content(extension: &str, description: &str) -> String {
    match extension {
        "rs" => format!("//! {}\n", description),
        "ts" | "tsx" | "js" | "jsx" => format!("// {}\nexport {{}};\n", description),
        "json" => "{}\n".to_string(),
        _ => format!("# {}\n", description),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_includes_current_content_for_rewrites() {
        let prompt = build_prompt("fix import", "remove it", "src/a.ts", Some("import x;\n"));
        assert!(prompt.contains("Current content"));
        assert!(prompt.contains("import x;"));

        let fresh = build_prompt("add helper", "create it", "src/b.ts", None);
        assert!(fresh.contains("does not exist yet"));
    }

    #[test]
    fn test_stub_content_is_valid_per_extension() {
        assert!(stub_content("rs", "placeholder").starts_with("//!"));
        assert!(stub_content("ts", "placeholder").contains("export"));
        assert_eq!(stub_content("json", "x"), "{}\n");
    }
}
