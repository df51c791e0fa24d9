//! Phase 5 — choose one target and produce a plan

use crate::app::App;
use crate::context::CycleContext;
use crate::phases::{Phase, PhaseResult};
use async_trait::async_trait;
use kaizen_common::util::generate_id;
use kaizen_common::{PhaseKind, Plan, PlanStep, RiskLevel};

/// Chooses exactly one target from the issues (preferred) or improvements
pub struct PlanPhase;

#[async_trait]
impl Phase for PlanPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Plan
    }

    async fn execute(&self, app: &App, ctx: &mut CycleContext) -> PhaseResult {
        // Issues first; among improvements the highest priority with a file
        let target = select_target(ctx);

        let Some(target) = target else {
            return PhaseResult::fail_stop("no valid plan target");
        };

        let file = target.file.clone();
        let steps = vec![
            PlanStep {
                description: format!("Analyze {} around the reported problem", file),
                file: None,
            },
            PlanStep {
                description: target.description.clone(),
                file: Some(file.clone()),
            },
            PlanStep {
                description: "Validate the rewritten file".to_string(),
                file: None,
            },
        ];

        let risk = classify_risk(app, &file, target.is_issue);
        let plan = Plan {
            id: generate_id("plan"),
            description: target.description.clone(),
            steps,
            affected_files: vec![file],
            risk,
            target_issue: target.issue_id,
            target_improvement: target.improvement_id,
        };
        let summary = format!("plan '{}' (risk {:?})", plan.description, plan.risk);
        ctx.plan = Some(plan);
        PhaseResult::ok(summary)
    }
}

struct Target {
    description: String,
    file: String,
    is_issue: bool,
    issue_id: Option<String>,
    improvement_id: Option<String>,
}

fn select_target(ctx: &CycleContext) -> Option<Target> {
    if let Some(issue) = ctx
        .issues
        .iter()
        .find(|i| !i.resolved && i.file.is_some())
    {
        return Some(Target {
            description: format!("Fix: {}", issue.message),
            file: issue.file.clone().expect("filtered on file presence"),
            is_issue: true,
            issue_id: Some(issue.id.clone()),
            improvement_id: None,
        });
    }

    let mut candidates: Vec<_> = ctx
        .improvements
        .iter()
        .filter(|i| i.file.is_some())
        .collect();
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
    candidates.first().map(|improvement| Target {
        description: improvement.description.clone(),
        file: improvement.file.clone().expect("filtered on file presence"),
        is_issue: false,
        issue_id: None,
        improvement_id: Some(improvement.id.clone()),
    })
}

fn classify_risk(app: &App, file: &str, is_issue: bool) -> RiskLevel {
    if app.guard.is_conditionally_protected(file) {
        RiskLevel::High
    } else if is_issue {
        RiskLevel::Medium
    } else if app.config.project_dir.join(file).exists() {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaizen_common::{Improvement, ImprovementKind, ImprovementPriority, Issue, IssueKind};

    fn improvement(id: &str, priority: ImprovementPriority, file: Option<&str>) -> Improvement {
        Improvement {
            id: id.to_string(),
            kind: ImprovementKind::Refactor,
            description: format!("improve {}", id),
            priority,
            file: file.map(String::from),
            line: None,
            source: "test".into(),
        }
    }

    #[test]
    fn test_issue_preferred_over_improvement() {
        let mut ctx = CycleContext::new("cycle_t".into());
        ctx.issues.push(Issue {
            id: "iss_1".into(),
            kind: IssueKind::BuildError,
            message: "cannot compile".into(),
            file: Some("src/a.rs".into()),
            line: None,
            resolved: false,
        });
        ctx.improvements
            .push(improvement("imp_1", ImprovementPriority::High, Some("src/b.rs")));

        let target = select_target(&ctx).unwrap();
        assert!(target.is_issue);
        assert_eq!(target.file, "src/a.rs");
        assert_eq!(target.issue_id.as_deref(), Some("iss_1"));
    }

    #[test]
    fn test_highest_priority_improvement_with_file_wins() {
        let mut ctx = CycleContext::new("cycle_t".into());
        ctx.improvements
            .push(improvement("low", ImprovementPriority::Low, Some("src/a.rs")));
        ctx.improvements
            .push(improvement("high-nofile", ImprovementPriority::High, None));
        ctx.improvements
            .push(improvement("high", ImprovementPriority::High, Some("src/b.rs")));

        let target = select_target(&ctx).unwrap();
        assert_eq!(target.improvement_id.as_deref(), Some("high"));
        assert_eq!(target.file, "src/b.rs");
    }

    #[test]
    fn test_no_target_without_files() {
        let mut ctx = CycleContext::new("cycle_t".into());
        ctx.improvements
            .push(improvement("nofile", ImprovementPriority::High, None));
        assert!(select_target(&ctx).is_none());
    }
}
