//! Cycle context and cycle results
//!
//! The context is owned exclusively by the orchestrator for the cycle's
//! lifetime and handed to phases one at a time. Phases append; they never
//! remove prior entries. Large fields are released at finalization.

use chrono::{DateTime, Utc};
use kaizen_common::{
    Change, CycleId, Goal, Improvement, Issue, PhaseKind, Plan, TestResult, TokenUsage, Trouble,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Context gathered by the search phase for the planner and implementer
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub target_file: Option<String>,
    pub file_content: Option<String>,
    pub related_files: Vec<String>,
    pub prior_troubles: Vec<Trouble>,
}

/// Shared mutable state for one cycle
#[derive(Debug)]
pub struct CycleContext {
    pub cycle_id: CycleId,
    pub start_time: DateTime<Utc>,
    pub issues: Vec<Issue>,
    pub improvements: Vec<Improvement>,
    pub plan: Option<Plan>,
    pub implemented_changes: Vec<Change>,
    pub test_results: Option<TestResult>,
    /// Populated just before flush at finalization
    pub troubles: Vec<Trouble>,
    pub active_goals: Vec<Goal>,
    pub goal_progress: HashMap<String, f32>,
    pub used_patterns: Vec<String>,
    pub pattern_matches: u32,
    pub ai_calls: u32,
    pub token_usage: TokenUsage,
    /// First phase that reported failure; set at most once
    pub failed_phase: Option<PhaseKind>,
    pub failure_reason: Option<String>,
    pub search_results: Option<SearchResults>,
    /// Snapshot taken at cycle start, for rollback
    pub snapshot_id: Option<String>,
    pub has_critical_failure: bool,
    /// Files whose content came from the fallback provider this cycle
    pub fallback_files: Vec<String>,
}

impl CycleContext {
    pub fn new(cycle_id: CycleId) -> Self {
        Self {
            cycle_id,
            start_time: Utc::now(),
            issues: Vec::new(),
            improvements: Vec::new(),
            plan: None,
            implemented_changes: Vec::new(),
            test_results: None,
            troubles: Vec::new(),
            active_goals: Vec::new(),
            goal_progress: HashMap::new(),
            used_patterns: Vec::new(),
            pattern_matches: 0,
            ai_calls: 0,
            token_usage: TokenUsage::default(),
            failed_phase: None,
            failure_reason: None,
            search_results: None,
            snapshot_id: None,
            has_critical_failure: false,
            fallback_files: Vec::new(),
        }
    }

    /// Record a phase failure. Only the first failing phase is kept; a
    /// critical phase additionally marks the cycle critically failed.
    pub fn record_failure(&mut self, phase: PhaseKind, reason: String) {
        if self.failed_phase.is_none() {
            self.failed_phase = Some(phase);
            self.failure_reason = Some(reason);
        }
        if phase.is_critical() {
            self.has_critical_failure = true;
        }
    }

    /// Whether the cycle counts as successful so far
    pub fn is_success(&self) -> bool {
        !self.has_critical_failure
    }

    /// Quality tag for the finished cycle
    pub fn quality(&self) -> CycleQuality {
        if self.has_critical_failure {
            CycleQuality::Failed
        } else if !self.implemented_changes.is_empty() && self.troubles.is_empty() {
            CycleQuality::Effective
        } else if !self.implemented_changes.is_empty() {
            CycleQuality::Partial
        } else {
            CycleQuality::NoOp
        }
    }

    /// Release the large fields at cycle end
    pub fn release(&mut self) {
        self.search_results = None;
        self.troubles.clear();
        self.active_goals.clear();
    }
}

/// Cycle quality classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleQuality {
    Failed,
    NoOp,
    Partial,
    Effective,
}

impl CycleQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleQuality::Failed => "failed",
            CycleQuality::NoOp => "no-op",
            CycleQuality::Partial => "partial",
            CycleQuality::Effective => "effective",
        }
    }
}

/// Counts for the one-shot textual report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleSummary {
    pub issue_count: usize,
    pub improvement_count: usize,
    pub change_count: usize,
    pub test_summary: Option<String>,
    pub token_total: u64,
}

/// The orchestrator's answer for one `run_cycle` invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub cycle_id: CycleId,
    pub success: bool,
    pub duration_ms: u64,
    pub trouble_count: usize,
    pub should_retry: bool,
    pub retry_reason: Option<String>,
    pub failed_phase: Option<PhaseKind>,
    pub skipped_early: bool,
    pub quality: CycleQuality,
    pub summary: CycleSummary,
}

impl CycleResult {
    /// Result for a cycle that was skipped because there was no work
    pub fn skipped() -> Self {
        Self {
            cycle_id: format!("skipped_{}", Utc::now().timestamp_millis()),
            success: true,
            duration_ms: 0,
            trouble_count: 0,
            should_retry: false,
            retry_reason: None,
            failed_phase: None,
            skipped_early: true,
            quality: CycleQuality::NoOp,
            summary: CycleSummary::default(),
        }
    }

    /// Result for a cycle refused because the system is paused
    pub fn paused() -> Self {
        Self {
            cycle_id: format!("paused_{}", Utc::now().timestamp_millis()),
            success: false,
            duration_ms: 0,
            trouble_count: 0,
            should_retry: false,
            retry_reason: Some("system paused after consecutive failures".to_string()),
            failed_phase: None,
            skipped_early: true,
            quality: CycleQuality::NoOp,
            summary: CycleSummary::default(),
        }
    }
}
