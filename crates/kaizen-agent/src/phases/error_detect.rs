//! Phase 2 — build error and recurring trouble detection

use crate::app::App;
use crate::context::CycleContext;
use crate::phases::{Phase, PhaseResult};
use crate::scan;
use async_trait::async_trait;
use kaizen_common::util::generate_id;
use kaizen_common::{AgentEvent, Issue, IssueKind, PhaseKind};
use kaizen_provider::run_argv;
use kaizen_queue::parse_build_errors;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Scans for build errors, recurring troubles, and naming conflicts
pub struct ErrorDetectPhase;

#[async_trait]
impl Phase for ErrorDetectPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::ErrorDetect
    }

    async fn execute(&self, app: &App, ctx: &mut CycleContext) -> PhaseResult {
        // Build probe
        if !app.config.build.build_command.is_empty() {
            match run_argv(
                &app.config.build.build_command,
                &app.config.project_dir,
                &app.subprocess_limits(),
            )
            .await
            {
                Ok(output) if !output.success() => {
                    for error in parse_build_errors(&output.combined()) {
                        let issue = Issue {
                            id: generate_id("iss"),
                            kind: IssueKind::BuildError,
                            message: error.message.clone(),
                            file: Some(error.file.clone()),
                            line: error.line,
                            resolved: false,
                        };
                        app.events.emit(AgentEvent::IssueDetected {
                            cycle_id: ctx.cycle_id.clone(),
                            issue: issue.clone(),
                        });
                        ctx.issues.push(issue);
                    }
                    if ctx.issues.is_empty() {
                        // Build failed without a parseable error line
                        ctx.issues.push(Issue {
                            id: generate_id("iss"),
                            kind: IssueKind::BuildError,
                            message: "Build command failed".to_string(),
                            file: None,
                            line: None,
                            resolved: false,
                        });
                    }
                }
                Ok(_) => debug!("Build probe passed"),
                Err(e) => {
                    warn!("Build probe could not run: {}", e);
                    app.collector.capture_error("error-detect", &e).await;
                }
            }
        }

        // Recurring unresolved troubles become issues once each
        let mut seen_messages = Vec::new();
        for trouble in app.troubles.unresolved().await.into_iter().rev().take(10) {
            if seen_messages.contains(&trouble.message) {
                continue;
            }
            seen_messages.push(trouble.message.clone());
            ctx.issues.push(Issue {
                id: generate_id("iss"),
                kind: IssueKind::RecurringTrouble,
                message: trouble.message,
                file: trouble.file,
                line: trouble.line,
                resolved: false,
            });
        }

        // Duplicate basenames across directories are naming conflicts
        let mut basenames: HashMap<String, String> = HashMap::new();
        for relative in scan::list_source_files(&app.config.project_dir) {
            let Some(name) = relative.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            let path = relative.to_string_lossy().into_owned();
            if let Some(first) = basenames.get(&name) {
                app.collector
                    .capture_naming_conflict("error-detect", &name, first, &path)
                    .await;
            } else {
                basenames.insert(name, path);
            }
        }

        let queued = app.queue.pending_count().await;
        if ctx.issues.is_empty() && queued == 0 {
            return PhaseResult::stop("no issues and no queued improvements");
        }
        PhaseResult::ok(format!(
            "{} issues detected, {} improvements queued",
            ctx.issues.len(),
            queued
        ))
    }
}
