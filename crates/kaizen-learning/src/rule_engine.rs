//! Rule-based pattern matcher
//!
//! The engine compiles an immutable snapshot of the pattern store at phase
//! entry. A pattern matches a file when every one of its conditions is
//! satisfied; the reported location is the first content-regex hit.

use crate::pattern::{
    ConditionKind, ConditionTarget, LearnedPattern, PatternMatch,
};
use regex::Regex;
use std::path::Path;
use tracing::warn;

struct CompiledPattern {
    pattern: LearnedPattern,
    path_globs: Vec<glob::Pattern>,
    path_regexes: Vec<Regex>,
    content_regexes: Vec<Regex>,
    error_codes: Vec<String>,
}

/// Matcher over a compiled snapshot of learned patterns
pub struct RuleEngine {
    compiled: Vec<CompiledPattern>,
}

impl RuleEngine {
    /// Compile a snapshot of patterns. Patterns with uncompilable
    /// conditions are skipped with a warning rather than failing the cycle.
    pub fn new(snapshot: Vec<LearnedPattern>) -> Self {
        let mut compiled = Vec::new();

        'patterns: for pattern in snapshot {
            let mut path_globs = Vec::new();
            let mut path_regexes = Vec::new();
            let mut content_regexes = Vec::new();
            let mut error_codes = Vec::new();

            for condition in &pattern.conditions {
                match (condition.kind, condition.target) {
                    (ConditionKind::FileGlob, _) => match glob::Pattern::new(&condition.value) {
                        Ok(g) => path_globs.push(g),
                        Err(e) => {
                            warn!(
                                "Pattern '{}' has invalid glob '{}': {}; skipping pattern",
                                pattern.name, condition.value, e
                            );
                            continue 'patterns;
                        }
                    },
                    (ConditionKind::Regex, target) => match Regex::new(&condition.value) {
                        Ok(r) => match target {
                            ConditionTarget::Path => path_regexes.push(r),
                            ConditionTarget::Content => content_regexes.push(r),
                        },
                        Err(e) => {
                            warn!(
                                "Pattern '{}' has invalid regex '{}': {}; skipping pattern",
                                pattern.name, condition.value, e
                            );
                            continue 'patterns;
                        }
                    },
                    (ConditionKind::ErrorCode, _) => error_codes.push(condition.value.clone()),
                }
            }

            compiled.push(CompiledPattern {
                pattern,
                path_globs,
                path_regexes,
                content_regexes,
                error_codes,
            });
        }

        Self { compiled }
    }

    pub fn pattern_count(&self) -> usize {
        self.compiled.len()
    }

    /// Match every compiled pattern against a single file. `error_codes`
    /// are the codes observed for this file this cycle (usually from build
    /// output); a pattern with error-code conditions only matches when all
    /// of them are present.
    pub fn match_file(
        &self,
        path: &Path,
        content: &str,
        error_codes: &[String],
    ) -> Vec<PatternMatch> {
        let path_str = path.to_string_lossy();
        let mut matches = Vec::new();

        for compiled in &self.compiled {
            if !compiled.path_globs.iter().all(|g| g.matches(&path_str)) {
                continue;
            }
            if !compiled.path_regexes.iter().all(|r| r.is_match(&path_str)) {
                continue;
            }
            if !compiled
                .error_codes
                .iter()
                .all(|code| error_codes.iter().any(|c| c == code))
            {
                continue;
            }

            let mut first_hit: Option<(u32, String)> = None;
            let mut all_content_match = true;
            for regex in &compiled.content_regexes {
                match find_first_line(regex, content) {
                    Some(hit) => {
                        if first_hit.is_none() {
                            first_hit = Some(hit);
                        }
                    }
                    None => {
                        all_content_match = false;
                        break;
                    }
                }
            }
            if !all_content_match {
                continue;
            }

            let (line, matched_content) = first_hit.unwrap_or((0, String::new()));
            matches.push(PatternMatch {
                pattern_id: compiled.pattern.id.clone(),
                pattern_name: compiled.pattern.name.clone(),
                file: path_str.to_string(),
                line,
                matched_content,
                confidence: compiled.pattern.stats.confidence,
            });
        }

        matches
    }

    /// Match all patterns against a batch of files
    pub fn match_all(&self, files: &[(std::path::PathBuf, String)]) -> Vec<PatternMatch> {
        let mut matches = Vec::new();
        for (path, content) in files {
            matches.extend(self.match_file(path, content, &[]));
        }
        matches
    }
}

fn find_first_line(regex: &Regex, content: &str) -> Option<(u32, String)> {
    for (index, line) in content.lines().enumerate() {
        if let Some(found) = regex.find(line) {
            return Some((index as u32 + 1, found.as_str().to_string()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{
        PatternCondition, PatternSolution, PatternStats, SolutionKind,
    };
    use chrono::Utc;
    use std::path::PathBuf;

    fn pattern(id: &str, conditions: Vec<PatternCondition>, confidence: f64) -> LearnedPattern {
        LearnedPattern {
            id: id.to_string(),
            name: format!("pattern {}", id),
            version: 1,
            conditions,
            solution: PatternSolution {
                kind: SolutionKind::Template,
                content: String::new(),
            },
            stats: PatternStats {
                usage_count: 4,
                success_count: 4,
                confidence,
                last_used: None,
                phase: crate::pattern::PatternPhase::Initial,
            },
            history: vec![],
            created_at: Utc::now(),
        }
    }

    fn glob_condition(value: &str) -> PatternCondition {
        PatternCondition {
            kind: ConditionKind::FileGlob,
            value: value.to_string(),
            target: ConditionTarget::Path,
        }
    }

    fn content_condition(value: &str) -> PatternCondition {
        PatternCondition {
            kind: ConditionKind::Regex,
            value: value.to_string(),
            target: ConditionTarget::Content,
        }
    }

    #[test]
    fn test_all_conditions_must_hold() {
        let engine = RuleEngine::new(vec![pattern(
            "p1",
            vec![glob_condition("**/*.rs"), content_condition(r"println!")],
            0.9,
        )]);

        let hits = engine.match_file(
            Path::new("src/main.rs"),
            "fn main() {\n    println!(\"hi\");\n}",
            &[],
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 2);
        assert_eq!(hits[0].confidence, 0.9);

        // Wrong extension: glob fails, no match even though content matches
        assert!(engine
            .match_file(Path::new("src/main.py"), "println!()", &[])
            .is_empty());

        // Right extension, no content hit
        assert!(engine
            .match_file(Path::new("src/lib.rs"), "fn quiet() {}", &[])
            .is_empty());
    }

    #[test]
    fn test_error_code_condition() {
        let engine = RuleEngine::new(vec![pattern(
            "p1",
            vec![PatternCondition {
                kind: ConditionKind::ErrorCode,
                value: "TS2304".into(),
                target: ConditionTarget::Content,
            }],
            0.8,
        )]);

        assert!(engine
            .match_file(Path::new("a.ts"), "code", &["TS2304".to_string()])
            .len()
            == 1);
        assert!(engine.match_file(Path::new("a.ts"), "code", &[]).is_empty());
    }

    #[test]
    fn test_invalid_regex_skips_pattern() {
        let engine = RuleEngine::new(vec![
            pattern("bad", vec![content_condition("(unclosed")], 0.5),
            pattern("good", vec![content_condition("ok")], 0.5),
        ]);
        assert_eq!(engine.pattern_count(), 1);
    }

    #[test]
    fn test_match_all_batches() {
        let engine = RuleEngine::new(vec![pattern(
            "p1",
            vec![content_condition(r"TODO")],
            0.7,
        )]);
        let files = vec![
            (PathBuf::from("a.rs"), "// TODO fix".to_string()),
            (PathBuf::from("b.rs"), "clean".to_string()),
            (PathBuf::from("c.rs"), "// TODO later".to_string()),
        ];
        assert_eq!(engine.match_all(&files).len(), 2);
    }
}
