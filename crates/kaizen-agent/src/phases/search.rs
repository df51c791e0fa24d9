//! Phase 4 — context retrieval for the chosen target

use crate::app::App;
use crate::context::{CycleContext, SearchResults};
use crate::phases::{Phase, PhaseResult};
use async_trait::async_trait;
use kaizen_common::PhaseKind;
use std::path::Path;

/// Upper bound on bytes loaded for the target file
const MAX_CONTENT_BYTES: usize = 64 * 1024;

/// Gathers file content, related files, and prior troubles for the target
pub struct SearchPhase;

#[async_trait]
impl Phase for SearchPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Search
    }

    async fn execute(&self, app: &App, ctx: &mut CycleContext) -> PhaseResult {
        // Preliminary target: the planner makes the binding choice, this
        // phase just fetches context for the likely one.
        let target_file = ctx
            .issues
            .iter()
            .find(|i| !i.resolved)
            .and_then(|i| i.file.clone())
            .or_else(|| {
                let mut improvements: Vec<_> =
                    ctx.improvements.iter().filter(|i| i.file.is_some()).collect();
                improvements.sort_by(|a, b| b.priority.cmp(&a.priority));
                improvements.first().and_then(|i| i.file.clone())
            });

        let mut results = SearchResults {
            target_file: target_file.clone(),
            ..Default::default()
        };

        if let Some(file) = &target_file {
            let absolute = app.config.project_dir.join(file);
            if let Ok(content) = tokio::fs::read_to_string(&absolute).await {
                let mut content = content;
                content.truncate(MAX_CONTENT_BYTES);
                results.file_content = Some(content);
            }

            // Siblings in the same directory are the cheapest related set
            if let Some(parent) = Path::new(file).parent() {
                let dir = app.config.project_dir.join(parent);
                if let Ok(mut entries) = tokio::fs::read_dir(&dir).await {
                    while let Ok(Some(entry)) = entries.next_entry().await {
                        let name = entry.file_name().to_string_lossy().into_owned();
                        let relative = parent.join(&name).to_string_lossy().into_owned();
                        if relative != *file && entry.path().is_file() {
                            results.related_files.push(relative);
                        }
                    }
                }
                results.related_files.sort();
                results.related_files.truncate(10);
            }

            results.prior_troubles = app
                .troubles
                .recent(50)
                .await
                .into_iter()
                .filter(|t| t.file.as_deref() == Some(file.as_str()))
                .collect();
        }

        let message = match &target_file {
            Some(file) => format!(
                "context for {} ({} related files, {} prior troubles)",
                file,
                results.related_files.len(),
                results.prior_troubles.len()
            ),
            None => "no target file to search around".to_string(),
        };
        ctx.search_results = Some(results);
        PhaseResult::ok(message)
    }
}
