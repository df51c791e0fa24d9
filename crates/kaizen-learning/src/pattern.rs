//! Learned pattern data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a condition inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionKind {
    FileGlob,
    Regex,
    ErrorCode,
}

/// Which part of a candidate the condition applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionTarget {
    Path,
    Content,
}

/// One matching condition; a pattern matches when all conditions hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCondition {
    pub kind: ConditionKind,
    pub value: String,
    pub target: ConditionTarget,
}

/// How a pattern's fix is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolutionKind {
    /// A literal before/after template small enough to apply directly
    Template,
    /// A prompt for the AI provider to apply the fix in context
    AiPrompt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSolution {
    pub kind: SolutionKind,
    pub content: String,
}

/// Confidence lifecycle, driven by usage-count thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternPhase {
    Initial,
    Trial,
    Established,
}

impl PatternPhase {
    /// Phase for a given usage count: ≥ 5 trial, ≥ 20 established
    pub fn for_usage(usage_count: u32) -> Self {
        if usage_count >= 20 {
            PatternPhase::Established
        } else if usage_count >= 5 {
            PatternPhase::Trial
        } else {
            PatternPhase::Initial
        }
    }
}

/// Usage statistics for a pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternStats {
    pub usage_count: u32,
    pub success_count: u32,
    /// success_count / usage_count once used at least once
    pub confidence: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub phase: PatternPhase,
}

impl Default for PatternStats {
    fn default() -> Self {
        Self {
            usage_count: 0,
            success_count: 0,
            confidence: 0.0,
            last_used: None,
            phase: PatternPhase::Initial,
        }
    }
}

/// One entry in a pattern's version history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRevision {
    pub version: u32,
    pub changed_at: DateTime<Utc>,
    pub note: String,
}

/// A rule derived from a past successful solution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub conditions: Vec<PatternCondition>,
    pub solution: PatternSolution,
    #[serde(default)]
    pub stats: PatternStats,
    #[serde(default)]
    pub history: Vec<PatternRevision>,
    pub created_at: DateTime<Utc>,
}

impl LearnedPattern {
    /// A pattern is a deprecation candidate after enough evidence of
    /// ineffectiveness
    pub fn is_deprecation_candidate(&self) -> bool {
        self.stats.usage_count >= 10 && self.stats.confidence < 0.1
    }

    /// A stale pattern was last used ≥ 90 days ago with little usage
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        if self.stats.usage_count >= 5 {
            return false;
        }
        let reference = self.stats.last_used.unwrap_or(self.created_at);
        (now - reference).num_days() >= 90
    }
}

/// A pattern hit against a concrete file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub pattern_name: String,
    pub file: String,
    pub line: u32,
    pub matched_content: String,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_thresholds() {
        assert_eq!(PatternPhase::for_usage(0), PatternPhase::Initial);
        assert_eq!(PatternPhase::for_usage(4), PatternPhase::Initial);
        assert_eq!(PatternPhase::for_usage(5), PatternPhase::Trial);
        assert_eq!(PatternPhase::for_usage(19), PatternPhase::Trial);
        assert_eq!(PatternPhase::for_usage(20), PatternPhase::Established);
    }

    #[test]
    fn test_deprecation_candidate() {
        let mut pattern = LearnedPattern {
            id: "p1".into(),
            name: "test".into(),
            version: 1,
            conditions: vec![],
            solution: PatternSolution {
                kind: SolutionKind::Template,
                content: String::new(),
            },
            stats: PatternStats {
                usage_count: 10,
                success_count: 0,
                confidence: 0.0,
                last_used: None,
                phase: PatternPhase::Trial,
            },
            history: vec![],
            created_at: Utc::now(),
        };
        assert!(pattern.is_deprecation_candidate());

        pattern.stats.confidence = 0.5;
        assert!(!pattern.is_deprecation_candidate());

        pattern.stats.confidence = 0.05;
        pattern.stats.usage_count = 9;
        assert!(!pattern.is_deprecation_candidate());
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let pattern = LearnedPattern {
            id: "p1".into(),
            name: "old".into(),
            version: 1,
            conditions: vec![],
            solution: PatternSolution {
                kind: SolutionKind::Template,
                content: String::new(),
            },
            stats: PatternStats {
                usage_count: 2,
                success_count: 2,
                confidence: 1.0,
                last_used: Some(now - chrono::Duration::days(120)),
                phase: PatternPhase::Initial,
            },
            history: vec![],
            created_at: now - chrono::Duration::days(200),
        };
        assert!(pattern.is_stale(now));

        let mut fresh = pattern.clone();
        fresh.stats.last_used = Some(now - chrono::Duration::days(10));
        assert!(!fresh.is_stale(now));

        let mut well_used = pattern;
        well_used.stats.usage_count = 6;
        assert!(!well_used.is_stale(now));
    }
}
