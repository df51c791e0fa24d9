//! Persistent repository of learned patterns
//!
//! All mutations write through atomically; reads return snapshots of the
//! in-memory image. Confidence is recomputed on every use and the pattern
//! phase advances by usage thresholds.

use crate::pattern::{LearnedPattern, PatternPhase, PatternRevision};
use crate::stats::{LearningStats, TopPattern};
use chrono::Utc;
use kaizen_common::store::{AtomicStore, LazyStore};
use kaizen_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// How many patterns appear in the top-N usage table
const TOP_PATTERN_COUNT: usize = 5;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PatternFile {
    patterns: Vec<LearnedPattern>,
}

/// Process-wide pattern repository
pub struct PatternRepository {
    store: LazyStore<PatternFile>,
    stats_store: AtomicStore<LearningStats>,
    history_max: usize,
}

impl PatternRepository {
    pub fn new(
        patterns_path: impl Into<PathBuf>,
        stats_path: impl Into<PathBuf>,
        history_max: usize,
    ) -> Self {
        Self {
            store: LazyStore::new(patterns_path),
            stats_store: AtomicStore::new(stats_path),
            history_max,
        }
    }

    /// Snapshot of all patterns
    pub async fn all(&self) -> Vec<LearnedPattern> {
        self.store.read().await.patterns.clone()
    }

    pub async fn get(&self, id: &str) -> Option<LearnedPattern> {
        self.store
            .read()
            .await
            .patterns
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub async fn insert(&self, pattern: LearnedPattern) -> Result<()> {
        info!("Learned new pattern '{}'", pattern.name);
        self.store
            .mutate(|file| file.patterns.push(pattern))
            .await
    }

    /// Replace an existing pattern, bumping its version and recording a
    /// bounded history entry.
    pub async fn update(&self, mut pattern: LearnedPattern, note: &str) -> Result<()> {
        let history_max = self.history_max;
        let note = note.to_string();
        self.store
            .mutate(move |file| {
                let Some(slot) = file.patterns.iter_mut().find(|p| p.id == pattern.id) else {
                    return Err(Error::Store(format!("Unknown pattern {}", pattern.id)));
                };
                pattern.version = slot.version + 1;
                pattern.history = slot.history.clone();
                pattern.history.push(PatternRevision {
                    version: pattern.version,
                    changed_at: Utc::now(),
                    note,
                });
                if pattern.history.len() > history_max {
                    let cut = pattern.history.len() - history_max;
                    pattern.history.drain(..cut);
                }
                *slot = pattern;
                Ok(())
            })
            .await?
    }

    /// Record one use of a pattern and recompute its confidence. The phase
    /// advances by usage thresholds; a pattern that crosses the deprecation
    /// threshold is only warned about here, pruning is a separate pass.
    pub async fn update_confidence(&self, id: &str, success: bool) -> Result<()> {
        let deprecation = self
            .store
            .mutate(|file| {
                let Some(pattern) = file.patterns.iter_mut().find(|p| p.id == id) else {
                    return None;
                };
                pattern.stats.usage_count += 1;
                if success {
                    pattern.stats.success_count += 1;
                }
                pattern.stats.confidence =
                    pattern.stats.success_count as f64 / pattern.stats.usage_count as f64;
                pattern.stats.phase = PatternPhase::for_usage(pattern.stats.usage_count);
                pattern.stats.last_used = Some(Utc::now());
                Some((pattern.name.clone(), pattern.is_deprecation_candidate()))
            })
            .await?;

        match deprecation {
            Some((name, true)) => {
                warn!("Pattern '{}' is a deprecation candidate (low confidence)", name);
            }
            Some(_) => {}
            None => warn!("update_confidence for unknown pattern {}", id),
        }
        Ok(())
    }

    /// Fold a completed cycle into the learning stats and refresh the
    /// top-N pattern table.
    pub async fn record_cycle_completion(&self, pattern_hits: u32, ai_calls: u32) -> Result<()> {
        let mut top: Vec<TopPattern> = {
            let file = self.store.read().await;
            file.patterns
                .iter()
                .map(|p| TopPattern {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    usage_count: p.stats.usage_count,
                    confidence: p.stats.confidence,
                })
                .collect()
        };
        top.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));
        top.truncate(TOP_PATTERN_COUNT);

        let mut stats = self.stats_store.load().await;
        stats.record_cycle(pattern_hits, ai_calls);
        stats.top_patterns = top;
        self.stats_store.save(&stats).await
    }

    /// Add token usage to the persisted stats
    pub async fn record_token_usage(&self, prompt_tokens: u64, completion_tokens: u64) -> Result<()> {
        let mut stats = self.stats_store.load().await;
        stats.record_token_usage(prompt_tokens, completion_tokens);
        self.stats_store.save(&stats).await
    }

    pub async fn stats(&self) -> LearningStats {
        self.stats_store.load().await
    }

    /// Drop patterns with enough usage and persistently low confidence
    pub async fn prune_ineffective(&self) -> Result<usize> {
        self.store
            .mutate(|file| {
                let before = file.patterns.len();
                file.patterns.retain(|p| !p.is_deprecation_candidate());
                let removed = before - file.patterns.len();
                if removed > 0 {
                    info!("Pruned {} ineffective patterns", removed);
                }
                removed
            })
            .await
    }

    /// Drop patterns unused for 90 days with little total usage
    pub async fn prune_stale(&self) -> Result<usize> {
        let now = Utc::now();
        self.store
            .mutate(move |file| {
                let before = file.patterns.len();
                file.patterns.retain(|p| !p.is_stale(now));
                let removed = before - file.patterns.len();
                if removed > 0 {
                    info!("Pruned {} stale patterns", removed);
                }
                removed
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{
        ConditionKind, ConditionTarget, PatternCondition, PatternSolution, SolutionKind,
    };

    fn repo_in(dir: &tempfile::TempDir) -> PatternRepository {
        PatternRepository::new(
            dir.path().join("patterns.json"),
            dir.path().join("learning-stats.json"),
            20,
        )
    }

    fn pattern(id: &str) -> LearnedPattern {
        LearnedPattern {
            id: id.to_string(),
            name: format!("pattern {}", id),
            version: 1,
            conditions: vec![PatternCondition {
                kind: ConditionKind::FileGlob,
                value: "**/*.rs".into(),
                target: ConditionTarget::Path,
            }],
            solution: PatternSolution {
                kind: SolutionKind::Template,
                content: "before -> after".into(),
            },
            stats: Default::default(),
            history: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_confidence_is_success_over_usage() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo_in(&dir);
        repo.insert(pattern("p1")).await.unwrap();

        for success in [true, true, false, true] {
            repo.update_confidence("p1", success).await.unwrap();
        }

        let p = repo.get("p1").await.unwrap();
        assert_eq!(p.stats.usage_count, 4);
        assert_eq!(p.stats.success_count, 3);
        assert!((p.stats.confidence - 0.75).abs() < f64::EPSILON);
        assert_eq!(p.stats.phase, PatternPhase::Initial);
        assert!(p.stats.last_used.is_some());
    }

    #[tokio::test]
    async fn test_phase_advances_with_usage() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo_in(&dir);
        repo.insert(pattern("p1")).await.unwrap();

        for _ in 0..5 {
            repo.update_confidence("p1", true).await.unwrap();
        }
        assert_eq!(repo.get("p1").await.unwrap().stats.phase, PatternPhase::Trial);

        for _ in 0..15 {
            repo.update_confidence("p1", true).await.unwrap();
        }
        assert_eq!(
            repo.get("p1").await.unwrap().stats.phase,
            PatternPhase::Established
        );
    }

    #[tokio::test]
    async fn test_prune_ineffective() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo_in(&dir);
        repo.insert(pattern("bad")).await.unwrap();
        repo.insert(pattern("good")).await.unwrap();

        for _ in 0..10 {
            repo.update_confidence("bad", false).await.unwrap();
            repo.update_confidence("good", true).await.unwrap();
        }

        assert_eq!(repo.prune_ineffective().await.unwrap(), 1);
        assert!(repo.get("bad").await.is_none());
        assert!(repo.get("good").await.is_some());
    }

    #[tokio::test]
    async fn test_record_cycle_completion_updates_stats() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo_in(&dir);
        repo.insert(pattern("p1")).await.unwrap();
        repo.update_confidence("p1", true).await.unwrap();

        repo.record_cycle_completion(3, 1).await.unwrap();
        let stats = repo.stats().await;
        assert_eq!(stats.total_cycles, 1);
        assert_eq!(stats.total_pattern_hits, 3);
        assert_eq!(stats.top_patterns.len(), 1);
        assert_eq!(stats.top_patterns[0].id, "p1");
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_bounds_history() {
        let dir = tempfile::tempdir().unwrap();
        let repo = PatternRepository::new(
            dir.path().join("patterns.json"),
            dir.path().join("learning-stats.json"),
            3,
        );
        repo.insert(pattern("p1")).await.unwrap();

        for i in 0..5 {
            let p = repo.get("p1").await.unwrap();
            repo.update(p, &format!("revision {}", i)).await.unwrap();
        }

        let p = repo.get("p1").await.unwrap();
        assert_eq!(p.version, 6);
        assert_eq!(p.history.len(), 3);
    }
}
