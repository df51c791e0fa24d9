//! Shared data model for improvement cycles
//!
//! These types flow through the cycle context and the persistent stores.
//! They are flat serde structs; every axis with a fixed vocabulary is an
//! enum rather than a free-form string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a cycle (timestamp-prefixed, monotonic)
pub type CycleId = String;

/// The eight fixed pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseKind {
    HealthCheck,
    ErrorDetect,
    ImproveFind,
    Search,
    Plan,
    Implement,
    TestGen,
    Verify,
}

impl PhaseKind {
    /// All phases in pipeline order
    pub const ALL: [PhaseKind; 8] = [
        PhaseKind::HealthCheck,
        PhaseKind::ErrorDetect,
        PhaseKind::ImproveFind,
        PhaseKind::Search,
        PhaseKind::Plan,
        PhaseKind::Implement,
        PhaseKind::TestGen,
        PhaseKind::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::HealthCheck => "health-check",
            PhaseKind::ErrorDetect => "error-detect",
            PhaseKind::ImproveFind => "improve-find",
            PhaseKind::Search => "search",
            PhaseKind::Plan => "plan",
            PhaseKind::Implement => "implement",
            PhaseKind::TestGen => "test-gen",
            PhaseKind::Verify => "verify",
        }
    }

    /// A failure in these phases marks the whole cycle as critically failed
    pub fn is_critical(&self) -> bool {
        matches!(self, PhaseKind::Implement | PhaseKind::Verify)
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a detected issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    BuildError,
    TestFailure,
    RecurringTrouble,
    ResourcePressure,
    Other,
}

/// A detected problem needing a fix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub kind: IssueKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub resolved: bool,
}

/// Kind of a proposed improvement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImprovementKind {
    Marker,
    CodeQuality,
    PatternMatch,
    AiAnalysis,
    Goal,
    ToolAdoption,
    Prevention,
    Refactor,
    Other,
}

/// Priority levels for discovered improvements
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ImprovementPriority {
    Low = 1,
    Medium = 2,
    High = 3,
}

/// A proposed, prioritized change (discovered or queued)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Improvement {
    pub id: String,
    pub kind: ImprovementKind,
    pub description: String,
    pub priority: ImprovementPriority,
    pub file: Option<String>,
    pub line: Option<u32>,
    /// Where the improvement came from, e.g. `phase-improve-find` or `queue`
    pub source: String,
}

/// Risk classification for a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One ordered step of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    pub file: Option<String>,
}

/// The chosen, structured intent to fix one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub description: String,
    pub steps: Vec<PlanStep>,
    pub affected_files: Vec<String>,
    pub risk: RiskLevel,
    pub target_issue: Option<String>,
    pub target_improvement: Option<String>,
}

/// How a file was changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

/// A concrete change applied to the workspace during a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub file: String,
    pub change_type: ChangeType,
    pub summary: Option<String>,
    pub related_issue: Option<String>,
}

/// Result of running the project's test command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Category of a captured trouble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TroubleCategory {
    BuildError,
    TestFailure,
    NamingConflict,
    TypeError,
    RuntimeError,
    LintError,
    DependencyError,
    ConfigError,
    SecurityIssue,
    PerformanceIssue,
    Other,
}

impl TroubleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TroubleCategory::BuildError => "build-error",
            TroubleCategory::TestFailure => "test-failure",
            TroubleCategory::NamingConflict => "naming-conflict",
            TroubleCategory::TypeError => "type-error",
            TroubleCategory::RuntimeError => "runtime-error",
            TroubleCategory::LintError => "lint-error",
            TroubleCategory::DependencyError => "dependency-error",
            TroubleCategory::ConfigError => "config-error",
            TroubleCategory::SecurityIssue => "security-issue",
            TroubleCategory::PerformanceIssue => "performance-issue",
            TroubleCategory::Other => "other",
        }
    }
}

/// Severity levels shared by troubles and aggregated errors
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A structured incident captured during a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trouble {
    pub id: String,
    pub cycle_id: CycleId,
    /// Phase or subsystem that observed the incident
    pub phase: String,
    pub category: TroubleCategory,
    pub severity: Severity,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Trouble {
    /// Dedup identity: two troubles with the same key are one incident
    pub fn dedup_key(&self) -> (String, Option<String>, TroubleCategory) {
        (self.message.clone(), self.file.clone(), self.category)
    }
}

/// Status machine for queued improvements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Scheduled,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl QueueStatus {
    /// Terminal statuses are eligible for garbage collection
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Skipped
        )
    }
}

/// A persistent work item in the improvement queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedImprovement {
    pub id: String,
    pub source: String,
    pub kind: ImprovementKind,
    pub title: String,
    pub description: String,
    /// Clamped to 0..=100
    pub priority: u8,
    pub status: QueueStatus,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub related_file: Option<String>,
    pub related_pattern_id: Option<String>,
    pub prevention_suggestion_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cycle_id: Option<CycleId>,
    pub result: Option<String>,
}

/// Token usage estimates accumulated across a cycle's provider calls
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A longer-term objective the agent works toward across cycles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: GoalStatus,
    /// Progress in 0.0..=1.0
    pub progress: f32,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of a goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Paused,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_and_criticality() {
        assert_eq!(PhaseKind::ALL.len(), 8);
        assert_eq!(PhaseKind::ALL[0], PhaseKind::HealthCheck);
        assert_eq!(PhaseKind::ALL[7], PhaseKind::Verify);
        assert!(PhaseKind::Implement.is_critical());
        assert!(PhaseKind::Verify.is_critical());
        assert!(!PhaseKind::Plan.is_critical());
    }

    #[test]
    fn test_trouble_category_serde_round_trip() {
        let json = serde_json::to_string(&TroubleCategory::NamingConflict).unwrap();
        assert_eq!(json, "\"naming-conflict\"");
        let back: TroubleCategory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TroubleCategory::NamingConflict);
    }

    #[test]
    fn test_queue_status_terminal() {
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::Skipped.is_terminal());
        assert!(!QueueStatus::Scheduled.is_terminal());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }
}
