//! Phase 3 — three-layer improvement discovery
//!
//! Layer 1 is rule-based: work markers and structural quality heuristics.
//! Layer 2 matches learned patterns against the source tree. Layer 3 sends
//! the files the first two layers said nothing about to the AI provider,
//! bounded to keep the cost predictable. The results merge with the top
//! queued improvements, goal hints, and tool-adoption recommendations.

use crate::app::App;
use crate::context::CycleContext;
use crate::phases::{Phase, PhaseResult};
use crate::scan;
use async_trait::async_trait;
use kaizen_common::util::{generate_id, truncate};
use kaizen_common::{Improvement, ImprovementKind, ImprovementPriority, PhaseKind};
use kaizen_learning::RuleEngine;
use kaizen_provider::CompletionRequest;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Pattern hits above this confidence become high-priority improvements
const PATTERN_CONFIDENCE_FLOOR: f64 = 0.8;
/// AI analysis only runs when the uncovered set is within this bound
const AI_ANALYSIS_MAX_FILES: usize = 10;
/// Queued improvements merged per cycle
const QUEUE_MERGE_COUNT: usize = 5;

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(TODO|FIXME|HACK|NOTE|OPTIMIZE)\b[:\s]*(.*)").expect("marker regex is valid")
    })
}

/// Discovers actionable improvements across three layers
pub struct ImproveFindPhase;

#[async_trait]
impl Phase for ImproveFindPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::ImproveFind
    }

    async fn execute(&self, app: &App, ctx: &mut CycleContext) -> PhaseResult {
        let files = scan::load_source_files(&app.config.project_dir).await;
        let mut covered: HashSet<String> = HashSet::new();

        // Layer 1: markers and structural heuristics
        for file in &files {
            let path = file.relative.to_string_lossy().into_owned();
            let before = ctx.improvements.len();
            find_markers(ctx, &path, &file.content);
            find_structural(ctx, &path, &file.content);
            if ctx.improvements.len() > before {
                covered.insert(path);
            }
        }

        // Layer 2: learned pattern matching over an immutable snapshot
        let engine = RuleEngine::new(app.patterns.all().await);
        if engine.pattern_count() > 0 {
            let batch: Vec<(std::path::PathBuf, String)> = files
                .iter()
                .map(|f| (f.relative.clone(), f.content.clone()))
                .collect();
            let matches = engine.match_all(&batch);
            ctx.pattern_matches += matches.len() as u32;
            for hit in matches {
                covered.insert(hit.file.clone());
                if !ctx.used_patterns.contains(&hit.pattern_id) {
                    ctx.used_patterns.push(hit.pattern_id.clone());
                }
                if hit.confidence > PATTERN_CONFIDENCE_FLOOR {
                    ctx.improvements.push(Improvement {
                        id: generate_id("imp"),
                        kind: ImprovementKind::PatternMatch,
                        description: format!("Apply learned pattern '{}'", hit.pattern_name),
                        priority: ImprovementPriority::High,
                        file: Some(hit.file),
                        line: Some(hit.line),
                        source: "pattern".to_string(),
                    });
                }
            }
        }

        // Layer 3: selective AI analysis of the uncovered remainder
        let uncovered: Vec<&scan::SourceFile> = files
            .iter()
            .filter(|f| !covered.contains(f.relative.to_string_lossy().as_ref()))
            .collect();
        if (1..=AI_ANALYSIS_MAX_FILES).contains(&uncovered.len())
            && app.providers.any_available().await
        {
            self.analyze_with_ai(app, ctx, &uncovered).await;
        } else if !uncovered.is_empty() {
            debug!(
                "Skipping AI analysis: {} uncovered files outside 1..={}",
                uncovered.len(),
                AI_ANALYSIS_MAX_FILES
            );
        }

        // Merge queued improvements; dequeue marks them scheduled
        match app.queue.dequeue(QUEUE_MERGE_COUNT).await {
            Ok(queued) => {
                for item in queued {
                    let priority = if item.priority >= 70 {
                        ImprovementPriority::High
                    } else if item.priority >= 40 {
                        ImprovementPriority::Medium
                    } else {
                        ImprovementPriority::Low
                    };
                    ctx.improvements.push(Improvement {
                        // Queue item ids flow through so finalization can
                        // close them out
                        id: item.id,
                        kind: item.kind,
                        description: format!("{}: {}", item.title, item.description),
                        priority,
                        file: item.related_file,
                        line: None,
                        source: "queue".to_string(),
                    });
                }
            }
            Err(e) => warn!("Failed to dequeue improvements: {}", e),
        }

        // Goal hints
        for goal in &ctx.active_goals {
            ctx.improvements.push(Improvement {
                id: generate_id("imp"),
                kind: ImprovementKind::Goal,
                description: format!("Advance goal '{}': {}", goal.title, goal.description),
                priority: ImprovementPriority::Low,
                file: None,
                line: None,
                source: "goal".to_string(),
            });
        }

        // Tool adoption
        find_tool_adoption(app, ctx).await;

        PhaseResult::ok(format!(
            "{} improvements discovered ({} pattern matches)",
            ctx.improvements.len(),
            ctx.pattern_matches
        ))
    }
}

impl ImproveFindPhase {
    async fn analyze_with_ai(&self, app: &App, ctx: &mut CycleContext, files: &[&scan::SourceFile]) {
        let mut prompt = String::from(
            "Review the following files and list concrete improvements, one per line, \
             formatted as `path: suggestion`. Only actionable items.\n\n",
        );
        for file in files {
            prompt.push_str(&format!(
                "=== {} ===\n{}\n",
                file.relative.display(),
                truncate(&file.content, 2000)
            ));
        }

        ctx.ai_calls += 1;
        match app.providers.complete(&CompletionRequest::new(prompt)).await {
            Ok((completion, _served_by)) => {
                ctx.token_usage.add(completion.usage);
                for line in completion.text.lines().take(20) {
                    let Some((path, suggestion)) = line.split_once(':') else {
                        continue;
                    };
                    let path = path.trim();
                    let suggestion = suggestion.trim();
                    if suggestion.is_empty() || !path.contains('.') {
                        continue;
                    }
                    ctx.improvements.push(Improvement {
                        id: generate_id("imp"),
                        kind: ImprovementKind::AiAnalysis,
                        description: suggestion.to_string(),
                        priority: ImprovementPriority::Medium,
                        file: Some(path.to_string()),
                        line: None,
                        source: "ai-analysis".to_string(),
                    });
                }
            }
            Err(e) => warn!("AI analysis failed: {}", e),
        }
    }
}

fn find_markers(ctx: &mut CycleContext, path: &str, content: &str) {
    for (line_no, line) in content.lines().enumerate() {
        let Some(caps) = marker_regex().captures(line) else {
            continue;
        };
        let marker = &caps[1];
        let priority = match marker {
            "FIXME" => Some(ImprovementPriority::High),
            "TODO" | "HACK" => Some(ImprovementPriority::Medium),
            // NOTE and OPTIMIZE are low signal and dropped
            _ => None,
        };
        let Some(priority) = priority else { continue };
        let detail = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        ctx.improvements.push(Improvement {
            id: generate_id("imp"),
            kind: ImprovementKind::Marker,
            description: if detail.is_empty() {
                format!("Resolve {} marker", marker)
            } else {
                format!("Resolve {}: {}", marker, truncate(detail, 120))
            },
            priority,
            file: Some(path.to_string()),
            line: Some(line_no as u32 + 1),
            source: "marker".to_string(),
        });
    }
}

fn find_structural(ctx: &mut CycleContext, path: &str, content: &str) {
    // Function length by distance between function starts
    let starts: Vec<usize> = content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let t = line.trim_start();
            t.starts_with("fn ")
                || t.starts_with("pub fn ")
                || t.starts_with("async fn ")
                || t.starts_with("pub async fn ")
                || t.starts_with("function ")
                || t.starts_with("export function ")
        })
        .map(|(i, _)| i)
        .collect();
    let total_lines = content.lines().count();
    for (index, start) in starts.iter().enumerate() {
        let end = starts.get(index + 1).copied().unwrap_or(total_lines);
        let length = end - start;
        let priority = if length > 100 {
            Some(ImprovementPriority::High)
        } else if length > 50 {
            Some(ImprovementPriority::Medium)
        } else {
            None
        };
        if let Some(priority) = priority {
            ctx.improvements.push(Improvement {
                id: generate_id("imp"),
                kind: ImprovementKind::CodeQuality,
                description: format!("Function of {} lines should be split", length),
                priority,
                file: Some(path.to_string()),
                line: Some(*start as u32 + 1),
                source: "quality".to_string(),
            });
        }
    }

    // Over-long lines, reported once per file
    if let Some((line_no, _)) = content
        .lines()
        .enumerate()
        .find(|(_, line)| line.chars().count() > 120)
    {
        ctx.improvements.push(Improvement {
            id: generate_id("imp"),
            kind: ImprovementKind::CodeQuality,
            description: "Lines exceed 120 characters".to_string(),
            priority: ImprovementPriority::Low,
            file: Some(path.to_string()),
            line: Some(line_no as u32 + 1),
            source: "quality".to_string(),
        });
    }
}

async fn find_tool_adoption(app: &App, ctx: &mut CycleContext) {
    let project = &app.config.project_dir;
    if !project.join(".gitignore").exists() {
        ctx.improvements.push(Improvement {
            id: generate_id("imp"),
            kind: ImprovementKind::ToolAdoption,
            description: "Add a .gitignore for build artifacts".to_string(),
            priority: ImprovementPriority::Low,
            file: None,
            line: None,
            source: "tool-adoption".to_string(),
        });
    }
    if !project.join(".github/workflows").is_dir() && !project.join(".gitlab-ci.yml").exists() {
        ctx.improvements.push(Improvement {
            id: generate_id("imp"),
            kind: ImprovementKind::ToolAdoption,
            description: "Set up continuous integration".to_string(),
            priority: ImprovementPriority::Low,
            file: None,
            line: None,
            source: "tool-adoption".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_priorities_and_dropped_low() {
        let mut ctx = CycleContext::new("cycle_t".into());
        let content = "// TODO: tidy this\n// FIXME broken edge case\n// NOTE just a note\n// OPTIMIZE later\n";
        find_markers(&mut ctx, "src/a.rs", content);

        assert_eq!(ctx.improvements.len(), 2);
        assert_eq!(ctx.improvements[0].priority, ImprovementPriority::Medium);
        assert_eq!(ctx.improvements[1].priority, ImprovementPriority::High);
        assert!(ctx.improvements[1].description.contains("FIXME"));
    }

    #[test]
    fn test_structural_long_function() {
        let mut ctx = CycleContext::new("cycle_t".into());
        let mut content = String::from("fn long_one() {\n");
        for i in 0..60 {
            content.push_str(&format!("    let x{} = {};\n", i, i));
        }
        content.push_str("}\n");
        find_structural(&mut ctx, "src/a.rs", &content);

        assert_eq!(ctx.improvements.len(), 1);
        assert_eq!(ctx.improvements[0].priority, ImprovementPriority::Medium);
        assert_eq!(ctx.improvements[0].kind, ImprovementKind::CodeQuality);
    }

    #[test]
    fn test_long_line_is_low_priority() {
        let mut ctx = CycleContext::new("cycle_t".into());
        let content = format!("let s = \"{}\";\n", "x".repeat(150));
        find_structural(&mut ctx, "src/a.rs", &content);
        assert_eq!(ctx.improvements.len(), 1);
        assert_eq!(ctx.improvements[0].priority, ImprovementPriority::Low);
    }
}
