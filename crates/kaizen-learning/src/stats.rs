//! Global learning statistics persisted alongside the pattern store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-pattern usage summary for the top-N table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopPattern {
    pub id: String,
    pub name: String,
    pub usage_count: u32,
    pub confidence: f64,
}

/// Aggregated learning statistics across all cycles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningStats {
    pub total_cycles: u64,
    pub total_pattern_hits: u64,
    pub total_ai_calls: u64,
    /// hits / (hits + ai_calls) over all cycles
    pub hit_rate: f64,
    #[serde(default)]
    pub top_patterns: Vec<TopPattern>,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LearningStats {
    /// Fold one completed cycle into the totals
    pub fn record_cycle(&mut self, pattern_hits: u32, ai_calls: u32) {
        self.total_cycles += 1;
        self.total_pattern_hits += pattern_hits as u64;
        self.total_ai_calls += ai_calls as u64;
        let denominator = self.total_pattern_hits + self.total_ai_calls;
        self.hit_rate = if denominator == 0 {
            0.0
        } else {
            self.total_pattern_hits as f64 / denominator as f64
        };
        self.updated_at = Some(Utc::now());
    }

    pub fn record_token_usage(&mut self, prompt_tokens: u64, completion_tokens: u64) {
        self.total_prompt_tokens += prompt_tokens;
        self.total_completion_tokens += completion_tokens;
    }
}
