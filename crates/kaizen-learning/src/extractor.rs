//! Pattern extraction from cycle outcomes
//!
//! Successful fixes become learned patterns: conditions are generalized
//! from the fixed file and a keyword table, the solution is a literal
//! template when both sides are small enough, an AI prompt otherwise.
//! Failed fixes are bucketed into failure patterns so later cycles can ask
//! which fixes were already tried for a given trouble.

use crate::pattern::{
    ConditionKind, ConditionTarget, LearnedPattern, PatternCondition, PatternSolution,
    SolutionKind,
};
use crate::repository::PatternRepository;
use chrono::{DateTime, Utc};
use kaizen_common::store::LazyStore;
use kaizen_common::util::{generate_id, levenshtein_similarity};
use kaizen_common::{Result, Trouble, TroubleCategory};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Template solutions are only stored when both sides fit this size
const TEMPLATE_MAX_CHARS: usize = 500;
/// Condition sets at or above this similarity merge into one pattern
const MERGE_SIMILARITY: f64 = 0.8;
/// Failure observations at or above this similarity share a bucket
const FAILURE_BUCKET_SIMILARITY: f64 = 0.7;

/// Keyword table mapping problem descriptions to content regexes
const KEYWORD_RULES: &[(&str, &str)] = &[
    ("console.log", r"console\.log\("),
    ("unused import", r"^\s*(use|import)\b.*$"),
    ("any type", r":\s*any\b"),
    ("todo marker", r"(?i)\b(TODO|FIXME)\b"),
    ("empty catch", r"catch\s*(\([^)]*\))?\s*\{\s*\}"),
    ("magic number", r"\b\d{3,}\b"),
    ("long function", r"(?m)^\s*(pub\s+)?(async\s+)?(fn|function)\b"),
];

/// Everything the feedback loop knows about one solved problem
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    /// Short description of the problem, used for naming and keywords
    pub problem: String,
    pub file: Option<String>,
    pub error_code: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// A failed fix attempt to fold into the failure buckets
#[derive(Debug, Clone)]
pub struct FailureObservation {
    pub trouble_category: TroubleCategory,
    pub trouble_message: String,
    pub trouble_file: Option<String>,
    pub attempted_fixes: Vec<String>,
    pub failure_reason: String,
}

/// A bucket of similar failed fixes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    pub id: String,
    pub trouble_category: TroubleCategory,
    pub trouble_message: String,
    pub trouble_file: Option<String>,
    pub attempted_fixes: Vec<String>,
    pub failure_reason: String,
    pub occurrence_count: u32,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FailureFile {
    patterns: Vec<FailurePattern>,
}

/// Derives new patterns from outcomes and records anti-patterns
pub struct PatternExtractor {
    repository: Arc<PatternRepository>,
    failures: LazyStore<FailureFile>,
}

impl PatternExtractor {
    pub fn new(repository: Arc<PatternRepository>, failures_path: impl Into<PathBuf>) -> Self {
        Self {
            repository,
            failures: LazyStore::new(failures_path),
        }
    }

    /// Derive a pattern from a successful fix and persist it, merging into
    /// an existing pattern when the condition sets are near-identical.
    /// Returns the id of the inserted or merged pattern.
    pub async fn extract_from_success(&self, ctx: &ExtractionContext) -> Result<Option<String>> {
        let conditions = derive_conditions(ctx);
        if conditions.is_empty() {
            debug!("No generalizable conditions for '{}'", ctx.problem);
            return Ok(None);
        }

        let solution = derive_solution(ctx);

        // Merge when an existing pattern's conditions are near-identical
        for existing in self.repository.all().await {
            if conditions_similar(&existing.conditions, &conditions) {
                debug!(
                    "Merging solution for '{}' into existing pattern '{}'",
                    ctx.problem, existing.name
                );
                let mut merged = existing.clone();
                merged.solution = solution;
                self.repository
                    .update(merged, &format!("merged solution from '{}'", ctx.problem))
                    .await?;
                return Ok(Some(existing.id));
            }
        }

        let pattern = LearnedPattern {
            id: generate_id("pat"),
            name: ctx.problem.clone(),
            version: 1,
            conditions,
            solution,
            stats: Default::default(),
            history: vec![],
            created_at: Utc::now(),
        };
        let id = pattern.id.clone();
        self.repository.insert(pattern).await?;
        Ok(Some(id))
    }

    /// Record a failed fix, bucketing by message similarity within the
    /// same category so occurrence counts accumulate.
    pub async fn record_failure(&self, observation: FailureObservation) -> Result<()> {
        self.failures
            .mutate(|file| {
                for bucket in file.patterns.iter_mut() {
                    if bucket.trouble_category == observation.trouble_category
                        && levenshtein_similarity(
                            &bucket.trouble_message,
                            &observation.trouble_message,
                        ) >= FAILURE_BUCKET_SIMILARITY
                    {
                        bucket.occurrence_count += 1;
                        bucket.last_seen = Utc::now();
                        for fix in &observation.attempted_fixes {
                            if !bucket.attempted_fixes.contains(fix) {
                                bucket.attempted_fixes.push(fix.clone());
                            }
                        }
                        bucket.failure_reason = observation.failure_reason.clone();
                        return;
                    }
                }
                info!(
                    "New failure pattern for {}: {}",
                    observation.trouble_category.as_str(),
                    observation.trouble_message
                );
                file.patterns.push(FailurePattern {
                    id: generate_id("flr"),
                    trouble_category: observation.trouble_category,
                    trouble_message: observation.trouble_message,
                    trouble_file: observation.trouble_file,
                    attempted_fixes: observation.attempted_fixes,
                    failure_reason: observation.failure_reason,
                    occurrence_count: 1,
                    last_seen: Utc::now(),
                });
            })
            .await
    }

    /// Fixes already tried for troubles similar to this one
    pub async fn attempted_fixes_for(&self, trouble: &Trouble) -> Vec<FailurePattern> {
        self.failures
            .read()
            .await
            .patterns
            .iter()
            .filter(|bucket| {
                bucket.trouble_category == trouble.category
                    && levenshtein_similarity(&bucket.trouble_message, &trouble.message)
                        >= FAILURE_BUCKET_SIMILARITY
            })
            .cloned()
            .collect()
    }
}

/// Generalize a file path into a glob over its folder class and extension:
/// `src/util/format.ts` becomes `src/**/*.ts`.
fn generalize_file_glob(file: &str) -> Option<String> {
    let path = Path::new(file);
    let extension = path.extension()?.to_string_lossy();
    let top = path.components().next()?.as_os_str().to_string_lossy();
    if path.components().count() > 1 {
        Some(format!("{}/**/*.{}", top, extension))
    } else {
        Some(format!("*.{}", extension))
    }
}

fn derive_conditions(ctx: &ExtractionContext) -> Vec<PatternCondition> {
    let mut conditions = Vec::new();

    if let Some(file) = &ctx.file {
        if let Some(glob) = generalize_file_glob(file) {
            conditions.push(PatternCondition {
                kind: ConditionKind::FileGlob,
                value: glob,
                target: ConditionTarget::Path,
            });
        }
    }

    let problem = ctx.problem.to_lowercase();
    for (keyword, regex) in KEYWORD_RULES {
        if problem.contains(keyword) {
            conditions.push(PatternCondition {
                kind: ConditionKind::Regex,
                value: (*regex).to_string(),
                target: ConditionTarget::Content,
            });
            break;
        }
    }

    if let Some(code) = &ctx.error_code {
        conditions.push(PatternCondition {
            kind: ConditionKind::ErrorCode,
            value: code.clone(),
            target: ConditionTarget::Content,
        });
    }

    conditions
}

fn derive_solution(ctx: &ExtractionContext) -> PatternSolution {
    match (&ctx.before, &ctx.after) {
        (Some(before), Some(after))
            if before.len() <= TEMPLATE_MAX_CHARS && after.len() <= TEMPLATE_MAX_CHARS =>
        {
            PatternSolution {
                kind: SolutionKind::Template,
                content: format!("--- before\n{}\n--- after\n{}", before, after),
            }
        }
        _ => PatternSolution {
            kind: SolutionKind::AiPrompt,
            content: format!(
                "Fix the following problem in the given file: {}. Apply the minimal change and keep the existing style.",
                ctx.problem
            ),
        },
    }
}

/// Condition sets are similar when they pair up one-to-one with
/// value-level similarity above the merge threshold.
fn conditions_similar(a: &[PatternCondition], b: &[PatternCondition]) -> bool {
    if a.len() != b.len() || a.is_empty() {
        return false;
    }
    let mut used = vec![false; b.len()];
    for ca in a {
        let mut found = false;
        for (i, cb) in b.iter().enumerate() {
            if used[i] || ca.kind != cb.kind {
                continue;
            }
            if levenshtein_similarity(&ca.value, &cb.value) > MERGE_SIMILARITY {
                used[i] = true;
                found = true;
                break;
            }
        }
        if !found {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor_in(dir: &tempfile::TempDir) -> (Arc<PatternRepository>, PatternExtractor) {
        let repo = Arc::new(PatternRepository::new(
            dir.path().join("patterns.json"),
            dir.path().join("learning-stats.json"),
            20,
        ));
        let extractor = PatternExtractor::new(repo.clone(), dir.path().join("failure-patterns.json"));
        (repo, extractor)
    }

    fn success_ctx(problem: &str, file: &str) -> ExtractionContext {
        ExtractionContext {
            problem: problem.to_string(),
            file: Some(file.to_string()),
            error_code: None,
            before: Some("import foo from 'foo';".to_string()),
            after: Some(String::new()),
        }
    }

    #[tokio::test]
    async fn test_extract_creates_pattern_with_glob_and_keyword() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, extractor) = extractor_in(&dir);

        let id = extractor
            .extract_from_success(&success_ctx("Remove unused import", "src/util/helper.ts"))
            .await
            .unwrap()
            .unwrap();

        let pattern = repo.get(&id).await.unwrap();
        assert!(pattern
            .conditions
            .iter()
            .any(|c| c.kind == ConditionKind::FileGlob && c.value == "src/**/*.ts"));
        assert!(pattern
            .conditions
            .iter()
            .any(|c| c.kind == ConditionKind::Regex));
        assert_eq!(pattern.solution.kind, SolutionKind::Template);
        assert_eq!(pattern.stats.usage_count, 0);
    }

    #[tokio::test]
    async fn test_near_identical_conditions_merge() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, extractor) = extractor_in(&dir);

        extractor
            .extract_from_success(&success_ctx("Remove unused import", "src/util/helper.ts"))
            .await
            .unwrap();
        extractor
            .extract_from_success(&success_ctx("unused import cleanup", "src/other/module.ts"))
            .await
            .unwrap();

        assert_eq!(repo.all().await.len(), 1);
        // Merge bumped the version
        assert_eq!(repo.all().await[0].version, 2);
    }

    #[tokio::test]
    async fn test_large_solution_becomes_ai_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, extractor) = extractor_in(&dir);

        let ctx = ExtractionContext {
            problem: "long function refactor".to_string(),
            file: Some("src/big.rs".to_string()),
            error_code: None,
            before: Some("x".repeat(600)),
            after: Some("y".repeat(600)),
        };
        let id = extractor.extract_from_success(&ctx).await.unwrap().unwrap();
        assert_eq!(repo.get(&id).await.unwrap().solution.kind, SolutionKind::AiPrompt);
    }

    #[tokio::test]
    async fn test_failure_bucketing_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, extractor) = extractor_in(&dir);

        let observation = FailureObservation {
            trouble_category: TroubleCategory::BuildError,
            trouble_message: "Cannot find module 'x'".to_string(),
            trouble_file: Some("src/a.ts".to_string()),
            attempted_fixes: vec!["reinstall".to_string()],
            failure_reason: "module still missing".to_string(),
        };
        extractor.record_failure(observation.clone()).await.unwrap();

        let mut second = observation;
        second.trouble_message = "Cannot find module 'y'".to_string();
        second.attempted_fixes = vec!["add path alias".to_string()];
        extractor.record_failure(second).await.unwrap();

        let trouble = Trouble {
            id: "t".into(),
            cycle_id: "c".into(),
            phase: "verify".into(),
            category: TroubleCategory::BuildError,
            severity: kaizen_common::Severity::High,
            message: "Cannot find module 'z'".into(),
            file: None,
            line: None,
            column: None,
            stack_trace: None,
            context: Default::default(),
            resolved: false,
            resolved_by: None,
            occurred_at: Utc::now(),
            resolved_at: None,
        };
        let buckets = extractor.attempted_fixes_for(&trouble).await;
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].occurrence_count, 2);
        assert_eq!(buckets[0].attempted_fixes.len(), 2);
    }

    #[test]
    fn test_generalize_file_glob() {
        assert_eq!(
            generalize_file_glob("src/util/format.ts").as_deref(),
            Some("src/**/*.ts")
        );
        assert_eq!(generalize_file_glob("main.rs").as_deref(), Some("*.rs"));
        assert_eq!(generalize_file_glob("Makefile"), None);
    }
}
