//! Policy gate for file paths, change sizes, and generated content
//!
//! Paths are normalized (leading `./`, duplicate slashes, duplicated
//! segment prefixes like `src/src/`) and validated against traversal and
//! control characters. Protected files come in two tiers: strictly
//! protected files are never written; conditionally protected files need an
//! explicit AI security-review approval. Generated content runs through a
//! dangerous-pattern set; any hit requires AI review before the write.

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Segment prefixes that providers tend to duplicate (`src/src/...`)
const DUPLICATED_PREFIXES: &[&str] = &["src", "workspace", "dist", "apps"];

/// Guard configuration
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Prefixes that must never be written
    pub strictly_protected: Vec<String>,
    /// Prefixes that require AI review approval before a write
    pub conditionally_protected: Vec<String>,
    /// Extensions generated changes may touch
    pub allowed_extensions: Vec<String>,
    pub max_files_per_change: usize,
    pub max_lines_per_file: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            strictly_protected: vec![
                "src/safety/".to_string(),
                ".git/".to_string(),
                ".env".to_string(),
                "config.json".to_string(),
            ],
            conditionally_protected: vec![
                "Cargo.toml".to_string(),
                "package.json".to_string(),
                "tsconfig.json".to_string(),
                ".github/".to_string(),
            ],
            allowed_extensions: vec![
                "rs".into(),
                "ts".into(),
                "tsx".into(),
                "js".into(),
                "jsx".into(),
                "json".into(),
                "toml".into(),
                "md".into(),
            ],
            max_files_per_change: 5,
            max_lines_per_file: 500,
        }
    }
}

/// Outcome of path validation
#[derive(Debug, Clone, PartialEq)]
pub struct PathValidation {
    pub valid: bool,
    /// Set when normalization repaired the path (duplicate-prefix case)
    pub corrected_path: Option<String>,
    pub error: Option<PathErrorKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathErrorKind {
    Empty,
    Traversal,
    InvalidCharacter,
}

/// Outcome of content validation
#[derive(Debug, Clone)]
pub struct ContentReport {
    pub safe: bool,
    pub warnings: Vec<String>,
}

struct DangerRule {
    regex: Regex,
    label: &'static str,
}

fn danger_rules() -> &'static Vec<DangerRule> {
    static RULES: OnceLock<Vec<DangerRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let raw: &[(&str, &str)] = &[
            (r"\beval\s*\(", "eval call"),
            (r"\bexec\s*\(", "exec call"),
            (r"child_process", "child_process usage"),
            (r"rm\s+-rf", "recursive delete"),
            (r"process\.exit\s*\(", "process exit"),
            (r"require\s*\([^)]*\+", "dynamic require"),
            (r"\bspawn\s*\(", "process spawn"),
            (r"\bexecSync\s*\(", "synchronous exec"),
            (r"(?:>>?|writeFileSync\s*\(\s*['\x22])\s*/etc/", "write to /etc"),
            (r"fetch\s*\(\s*['\x22]file://", "file:// fetch"),
        ];
        raw.iter()
            .map(|(pattern, label)| DangerRule {
                regex: Regex::new(pattern).expect("danger pattern is valid"),
                label,
            })
            .collect()
    })
}

/// The policy engine
pub struct Guard {
    config: GuardConfig,
}

impl Guard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Normalize a workspace-relative path: strip leading `./`, collapse
    /// duplicate slashes, collapse duplicated segment prefixes
    /// (`src/src/a.ts` → `src/a.ts`).
    pub fn normalize_path(&self, path: &str) -> String {
        let mut p = path.trim().to_string();
        while let Some(stripped) = p.strip_prefix("./") {
            p = stripped.to_string();
        }
        while p.contains("//") {
            p = p.replace("//", "/");
        }

        let mut segments: Vec<&str> = p.split('/').filter(|s| !s.is_empty()).collect();
        let mut index = 0;
        while index + 1 < segments.len() {
            let segment = segments[index];
            if segment == segments[index + 1] && DUPLICATED_PREFIXES.contains(&segment) {
                segments.remove(index + 1);
            } else {
                index += 1;
            }
        }
        segments.join("/")
    }

    /// Validate a path for traversal and invalid characters. When
    /// normalization changed the path, the corrected form is returned.
    pub fn validate_path(&self, path: &str) -> PathValidation {
        if path.trim().is_empty() {
            return PathValidation {
                valid: false,
                corrected_path: None,
                error: Some(PathErrorKind::Empty),
            };
        }

        let normalized = self.normalize_path(path);
        if normalized.split('/').any(|segment| segment == "..") || path.trim().starts_with('/') {
            return PathValidation {
                valid: false,
                corrected_path: None,
                error: Some(PathErrorKind::Traversal),
            };
        }

        let has_bad_char = normalized
            .chars()
            .any(|c| c.is_control() || matches!(c, ';' | '|' | '&' | '$' | '`' | '<' | '>'));
        if has_bad_char {
            return PathValidation {
                valid: false,
                corrected_path: None,
                error: Some(PathErrorKind::InvalidCharacter),
            };
        }

        let corrected = if normalized != path.trim() {
            debug!("Corrected path '{}' -> '{}'", path, normalized);
            Some(normalized)
        } else {
            None
        };
        PathValidation {
            valid: true,
            corrected_path: corrected,
            error: None,
        }
    }

    pub fn is_strictly_protected(&self, path: &str) -> bool {
        let normalized = self.normalize_path(path);
        self.config
            .strictly_protected
            .iter()
            .any(|prefix| normalized.starts_with(prefix.as_str()))
    }

    pub fn is_conditionally_protected(&self, path: &str) -> bool {
        let normalized = self.normalize_path(path);
        self.config
            .conditionally_protected
            .iter()
            .any(|prefix| normalized.starts_with(prefix.as_str()))
    }

    /// Validate an overall change set against the caps, the extension
    /// allow-list, and the protected tiers.
    pub fn validate_change(
        &self,
        files: &[String],
        total_lines: usize,
    ) -> Result<(), String> {
        if files.len() > self.config.max_files_per_change {
            return Err(format!(
                "Change touches {} files, maximum is {}",
                files.len(),
                self.config.max_files_per_change
            ));
        }
        if total_lines > self.config.max_lines_per_file * files.len().max(1) {
            return Err(format!(
                "Change has {} lines, maximum is {} per file",
                total_lines,
                self.config.max_lines_per_file
            ));
        }
        for file in files {
            let extension = std::path::Path::new(file)
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !self.config.allowed_extensions.iter().any(|e| e == &extension) {
                return Err(format!("Extension '{}' is not allowed ({})", extension, file));
            }
            if self.is_strictly_protected(file) {
                return Err(format!("File '{}' is protected", file));
            }
        }
        Ok(())
    }

    /// Scan generated content for dangerous patterns. Unsafe content
    /// requires AI review before it may be written.
    pub fn validate_code_content(&self, code: &str) -> ContentReport {
        let warnings: Vec<String> = danger_rules()
            .iter()
            .filter(|rule| rule.regex.is_match(code))
            .map(|rule| rule.label.to_string())
            .collect();
        ContentReport {
            safe: warnings.is_empty(),
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> Guard {
        Guard::new(GuardConfig::default())
    }

    #[test]
    fn test_normalize_strips_dot_and_duplicate_slashes() {
        let g = guard();
        assert_eq!(g.normalize_path("./src//lib.rs"), "src/lib.rs");
        assert_eq!(g.normalize_path("././a.ts"), "a.ts");
    }

    #[test]
    fn test_normalize_collapses_duplicated_prefixes() {
        let g = guard();
        assert_eq!(g.normalize_path("src/src/app.ts"), "src/app.ts");
        assert_eq!(g.normalize_path("dist/dist/out.js"), "dist/out.js");
        // Non-listed segments are untouched
        assert_eq!(g.normalize_path("tests/tests/a.rs"), "tests/tests/a.rs");
    }

    #[test]
    fn test_validate_rejects_traversal() {
        let g = guard();
        let result = g.validate_path("../etc/passwd");
        assert!(!result.valid);
        assert_eq!(result.error, Some(PathErrorKind::Traversal));
        assert!(!g.validate_path("/etc/passwd").valid);
    }

    #[test]
    fn test_validate_rejects_shell_characters() {
        let g = guard();
        let result = g.validate_path("src/a;rm.ts");
        assert_eq!(result.error, Some(PathErrorKind::InvalidCharacter));
    }

    #[test]
    fn test_validate_returns_corrected_path() {
        let g = guard();
        let result = g.validate_path("src/src/app.ts");
        assert!(result.valid);
        assert_eq!(result.corrected_path.as_deref(), Some("src/app.ts"));
    }

    #[test]
    fn test_protected_tiers() {
        let g = guard();
        assert!(g.is_strictly_protected("src/safety/guard.ts"));
        assert!(g.is_strictly_protected("./src/safety/guard.ts"));
        assert!(!g.is_strictly_protected("src/app.ts"));
        assert!(g.is_conditionally_protected("Cargo.toml"));
        assert!(!g.is_conditionally_protected("src/main.rs"));
    }

    #[test]
    fn test_validate_change_caps() {
        let g = guard();
        let files: Vec<String> = (0..6).map(|i| format!("src/f{}.rs", i)).collect();
        assert!(g.validate_change(&files, 100).is_err());

        let files = vec!["src/a.rs".to_string()];
        assert!(g.validate_change(&files, 100).is_ok());
        assert!(g.validate_change(&files, 501).is_err());
        assert!(g
            .validate_change(&["src/safety/guard.ts".to_string()], 10)
            .is_err());
        assert!(g.validate_change(&["binary.exe".to_string()], 10).is_err());
    }

    #[test]
    fn test_content_scan_flags_dangerous_patterns() {
        let g = guard();
        let report = g.validate_code_content("const out = eval(userInput);");
        assert!(!report.safe);
        assert_eq!(report.warnings, vec!["eval call".to_string()]);

        let report = g.validate_code_content("require('fs' + suffix)");
        assert!(!report.safe);

        let report = g.validate_code_content("fn add(a: u32, b: u32) -> u32 { a + b }");
        assert!(report.safe);
    }
}
