//! Trouble abstraction into recurring patterns and prevention suggestions
//!
//! Troubles group by category plus message-token similarity. Each group is
//! matched against the known trouble patterns (regex hit weight 0.7,
//! keyword-overlap weight 0.3); a score above 0.5 joins the existing
//! pattern, anything else becomes a new one. A rule table generates
//! prevention suggestions by category; low-confidence patterns get up to
//! three extra suggestions from the AI provider.

use chrono::{DateTime, Utc};
use kaizen_common::store::LazyStore;
use kaizen_common::util::{generate_id, jaccard_similarity, truncate};
use kaizen_common::{Result, Trouble, TroubleCategory};
use kaizen_provider::{AiProvider, CompletionRequest};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Troubles with message similarity above this share a group
const GROUP_SIMILARITY: f64 = 0.5;
/// Combined match score above this joins an existing pattern
const JOIN_SCORE: f64 = 0.5;
const REGEX_WEIGHT: f64 = 0.7;
const KEYWORD_WEIGHT: f64 = 0.3;
/// Patterns below this confidence get AI-generated extra suggestions
const AI_CONSULT_CONFIDENCE: f64 = 0.7;
const MAX_AI_SUGGESTIONS: usize = 3;

/// A prevention measure derived from a trouble pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreventionSuggestion {
    pub id: String,
    pub description: String,
    /// Whether the measure can be applied without a human
    pub automated: bool,
    pub confidence: f64,
}

/// An abstraction over recurring troubles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TroublePattern {
    pub id: String,
    pub name: String,
    pub category: TroubleCategory,
    pub keywords: Vec<String>,
    pub regex: Option<String>,
    pub occurrence_count: u32,
    pub confidence: f64,
    pub prevention_suggestions: Vec<PreventionSuggestion>,
    pub last_occurred_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TroublePatternFile {
    patterns: Vec<TroublePattern>,
}

/// Result of one analysis pass
#[derive(Debug, Default)]
pub struct AnalysisOutcome {
    pub new_patterns: usize,
    pub updated_patterns: usize,
    /// `(pattern, suggestion)` pairs fresh from this pass, for the queue
    pub new_suggestions: Vec<(TroublePattern, PreventionSuggestion)>,
}

/// Groups troubles, maintains trouble patterns, generates preventions
pub struct AbstractionEngine {
    store: LazyStore<TroublePatternFile>,
    provider: Option<Arc<dyn AiProvider>>,
}

impl AbstractionEngine {
    pub fn new(path: impl Into<PathBuf>, provider: Option<Arc<dyn AiProvider>>) -> Self {
        Self {
            store: LazyStore::new(path),
            provider,
        }
    }

    pub async fn patterns(&self) -> Vec<TroublePattern> {
        self.store.read().await.patterns.clone()
    }

    /// Analyze a cycle's troubles: update or create trouble patterns and
    /// produce fresh prevention suggestions.
    pub async fn analyze(&self, troubles: &[Trouble]) -> Result<AnalysisOutcome> {
        if troubles.is_empty() {
            return Ok(AnalysisOutcome::default());
        }

        let groups = group_troubles(troubles);
        debug!("Abstracted {} troubles into {} groups", troubles.len(), groups.len());

        let mut outcome = AnalysisOutcome::default();

        for group in groups {
            let representative = group[0];
            let keywords = extract_keywords(&representative.message);

            let (pattern, is_new) = self
                .store
                .mutate(|file| {
                    let best = file
                        .patterns
                        .iter_mut()
                        .filter(|p| p.category == representative.category)
                        .map(|p| {
                            let score = match_score(p, &representative.message, &keywords);
                            (score, p)
                        })
                        .filter(|(score, _)| *score > JOIN_SCORE)
                        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

                    if let Some((_, existing)) = best {
                        existing.occurrence_count += group.len() as u32;
                        existing.last_occurred_at = Utc::now();
                        // Confidence grows with evidence, saturating at 1.0
                        existing.confidence =
                            (existing.occurrence_count as f64 / (existing.occurrence_count as f64 + 3.0)).min(1.0);
                        for keyword in &keywords {
                            if !existing.keywords.contains(keyword) {
                                existing.keywords.push(keyword.clone());
                            }
                        }
                        (existing.clone(), false)
                    } else {
                        let pattern = TroublePattern {
                            id: generate_id("tpt"),
                            name: truncate(&representative.message, 60),
                            category: representative.category,
                            keywords: keywords.clone(),
                            regex: derive_regex(&representative.message),
                            occurrence_count: group.len() as u32,
                            confidence: group.len() as f64 / (group.len() as f64 + 3.0),
                            prevention_suggestions: Vec::new(),
                            last_occurred_at: Utc::now(),
                        };
                        file.patterns.push(pattern.clone());
                        (pattern, true)
                    }
                })
                .await?;

            if is_new {
                outcome.new_patterns += 1;
                info!("New trouble pattern: {}", pattern.name);
            } else {
                outcome.updated_patterns += 1;
            }

            let mut suggestions = rule_based_suggestions(pattern.category);
            if pattern.confidence < AI_CONSULT_CONFIDENCE {
                suggestions.extend(self.ai_suggestions(&pattern).await);
            }

            // Persist only suggestions the pattern does not already carry
            let fresh = self
                .store
                .mutate(|file| {
                    let Some(slot) = file.patterns.iter_mut().find(|p| p.id == pattern.id) else {
                        return Vec::new();
                    };
                    let mut fresh = Vec::new();
                    for suggestion in suggestions {
                        let known = slot
                            .prevention_suggestions
                            .iter()
                            .any(|s| s.description == suggestion.description);
                        if !known {
                            slot.prevention_suggestions.push(suggestion.clone());
                            fresh.push(suggestion);
                        }
                    }
                    fresh
                })
                .await?;

            for suggestion in fresh {
                outcome.new_suggestions.push((pattern.clone(), suggestion));
            }
        }

        Ok(outcome)
    }

    async fn ai_suggestions(&self, pattern: &TroublePattern) -> Vec<PreventionSuggestion> {
        let Some(provider) = &self.provider else {
            return Vec::new();
        };
        let prompt = format!(
            "The following {} keeps recurring in a codebase: \"{}\". \
             List up to {} concrete prevention measures, one per line, no numbering.",
            pattern.category.as_str(),
            pattern.name,
            MAX_AI_SUGGESTIONS,
        );
        match provider.complete(&CompletionRequest::new(prompt)).await {
            Ok(completion) => completion
                .text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .take(MAX_AI_SUGGESTIONS)
                .map(|line| PreventionSuggestion {
                    id: generate_id("sug"),
                    description: line.to_string(),
                    automated: false,
                    confidence: 0.5,
                })
                .collect(),
            Err(e) => {
                warn!("AI prevention consult failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Queue priority for a prevention suggestion: boosted by pattern
/// occurrence and confidence, the automation flag, and the suggestion's own
/// confidence. The improvement queue clamps to 0..=100.
pub fn suggestion_priority(pattern: &TroublePattern, suggestion: &PreventionSuggestion) -> i64 {
    let mut priority = pattern.occurrence_count as i64 * 5;
    priority += (pattern.confidence * 20.0) as i64;
    if suggestion.automated {
        priority += 10;
    }
    priority += (suggestion.confidence * 20.0) as i64;
    priority
}

/// Group troubles by category and message similarity
fn group_troubles(troubles: &[Trouble]) -> Vec<Vec<&Trouble>> {
    let mut groups: Vec<Vec<&Trouble>> = Vec::new();
    for trouble in troubles {
        let slot = groups.iter_mut().find(|group| {
            group[0].category == trouble.category
                && jaccard_similarity(&group[0].message, &trouble.message) > GROUP_SIMILARITY
        });
        match slot {
            Some(group) => group.push(trouble),
            None => groups.push(vec![trouble]),
        }
    }
    groups
}

/// Score a trouble message against an existing pattern
fn match_score(pattern: &TroublePattern, message: &str, keywords: &[String]) -> f64 {
    let regex_score = match &pattern.regex {
        Some(raw) => match Regex::new(raw) {
            Ok(re) if re.is_match(message) => 1.0,
            _ => 0.0,
        },
        None => 0.0,
    };

    let keyword_score = if pattern.keywords.is_empty() || keywords.is_empty() {
        0.0
    } else {
        let known: HashSet<&String> = pattern.keywords.iter().collect();
        let overlap = keywords.iter().filter(|k| known.contains(k)).count();
        overlap as f64 / keywords.len() as f64
    };

    regex_score * REGEX_WEIGHT + keyword_score * KEYWORD_WEIGHT
}

/// Significant lowercase tokens of a message
fn extract_keywords(message: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    message
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .filter(|t| seen.insert(t.to_string()))
        .map(|t| t.to_string())
        .take(8)
        .collect()
}

/// Turn a message into a literal-ish regex with identifiers generalized:
/// quoted names and numbers become wildcards.
fn derive_regex(message: &str) -> Option<String> {
    if message.len() < 8 {
        return None;
    }
    let escaped = regex::escape(message);
    let generalized = Regex::new(r"'[^']*'|\\'[^']*\\'|\d+")
        .ok()?
        .replace_all(&escaped, ".+")
        .into_owned();
    Some(generalized)
}

/// Prevention rule table by trouble category
fn rule_based_suggestions(category: TroubleCategory) -> Vec<PreventionSuggestion> {
    let entries: &[(&str, bool, f64)] = match category {
        TroubleCategory::BuildError => {
            &[("Add a pre-commit hook that runs the build before every commit", true, 0.9)]
        }
        TroubleCategory::TestFailure => &[
            ("Enforce a minimum coverage threshold in CI", false, 0.8),
            ("Run the test suite in a pre-commit hook", true, 0.85),
        ],
        TroubleCategory::NamingConflict => &[
            ("Adopt a module-prefix naming convention for new files", false, 0.8),
            ("Add a lint rule that rejects duplicate module names", true, 0.75),
        ],
        TroubleCategory::TypeError => {
            &[("Enable strict type checking in the compiler configuration", true, 0.9)]
        }
        TroubleCategory::LintError => {
            &[("Run the linter on staged files before every commit", true, 0.85)]
        }
        TroubleCategory::DependencyError => {
            &[("Schedule a recurring dependency audit", true, 0.8)]
        }
        _ => &[],
    };

    entries
        .iter()
        .map(|(description, automated, confidence)| PreventionSuggestion {
            id: generate_id("sug"),
            description: (*description).to_string(),
            automated: *automated,
            confidence: *confidence,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaizen_common::Severity;
    use kaizen_provider::StaticProvider;

    fn trouble(message: &str, category: TroubleCategory) -> Trouble {
        Trouble {
            id: generate_id("trb"),
            cycle_id: "cycle_test".into(),
            phase: "verify".into(),
            category,
            severity: Severity::High,
            message: message.to_string(),
            file: Some("src/foo.ts".into()),
            line: None,
            column: None,
            stack_trace: None,
            context: Default::default(),
            resolved: false,
            resolved_by: None,
            occurred_at: Utc::now(),
            resolved_at: None,
        }
    }

    fn engine_in(dir: &tempfile::TempDir) -> AbstractionEngine {
        AbstractionEngine::new(dir.path().join("trouble-patterns.json"), None)
    }

    #[tokio::test]
    async fn test_similar_troubles_form_one_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        let troubles = vec![
            trouble("Cannot find module 'x'", TroubleCategory::BuildError),
            trouble("Cannot find module 'y'", TroubleCategory::BuildError),
            trouble("Tests timed out after 30s", TroubleCategory::TestFailure),
        ];
        let outcome = engine.analyze(&troubles).await.unwrap();
        assert_eq!(outcome.new_patterns, 2);

        let patterns = engine.patterns().await;
        let build = patterns
            .iter()
            .find(|p| p.category == TroubleCategory::BuildError)
            .unwrap();
        assert_eq!(build.occurrence_count, 2);
    }

    #[tokio::test]
    async fn test_recurrence_joins_existing_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine
            .analyze(&[trouble("Cannot find module 'x'", TroubleCategory::BuildError)])
            .await
            .unwrap();
        let outcome = engine
            .analyze(&[trouble("Cannot find module 'z'", TroubleCategory::BuildError)])
            .await
            .unwrap();

        assert_eq!(outcome.new_patterns, 0);
        assert_eq!(outcome.updated_patterns, 1);
        let patterns = engine.patterns().await;
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].occurrence_count, 2);
    }

    #[tokio::test]
    async fn test_rule_table_suggestions_reach_outcome_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        let outcome = engine
            .analyze(&[trouble("Expected ';' at end of statement", TroubleCategory::TypeError)])
            .await
            .unwrap();
        assert_eq!(outcome.new_suggestions.len(), 1);
        assert!(outcome.new_suggestions[0].1.description.contains("strict"));

        // Re-analyzing does not duplicate the suggestion
        let outcome = engine
            .analyze(&[trouble("Expected ',' at end of statement", TroubleCategory::TypeError)])
            .await
            .unwrap();
        assert!(outcome.new_suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_low_confidence_consults_provider() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(StaticProvider::new(
            "advisor",
            vec!["Pin dependency versions\nAdd a lockfile check\nExtra one\nIgnored fourth".into()],
        ));
        let engine = AbstractionEngine::new(
            dir.path().join("trouble-patterns.json"),
            Some(provider as Arc<dyn AiProvider>),
        );

        let outcome = engine
            .analyze(&[trouble("Package left unresolved by installer", TroubleCategory::DependencyError)])
            .await
            .unwrap();
        // 1 rule-based + 3 AI suggestions, capped
        assert_eq!(outcome.new_suggestions.len(), 4);
    }

    #[test]
    fn test_derive_regex_generalizes_identifiers() {
        let raw = derive_regex("Cannot find module 'left-pad'").unwrap();
        let re = Regex::new(&raw).unwrap();
        assert!(re.is_match("Cannot find module 'right-pad'"));
    }
}
