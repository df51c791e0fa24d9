//! Parsers for build and test subprocess output
//!
//! Build error lines come in three shapes, tried in order:
//! TypeScript-style `file(line,col): error CODE: message`, generic
//! `file:line:col: message`, and a bare file path with a message. At most
//! ten errors are collected per run.

use kaizen_common::TestResult;
use regex::Regex;
use std::sync::OnceLock;

/// Maximum parsed error lines per build run
pub const MAX_PARSED_ERRORS: usize = 10;

/// One parsed build error
#[derive(Debug, Clone, PartialEq)]
pub struct BuildErrorLine {
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub code: Option<String>,
    pub message: String,
    pub raw: String,
}

fn ts_style_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // src/app.ts(12,5): error TS2304: Cannot find name 'foo'.
    RE.get_or_init(|| {
        Regex::new(r"^(?P<file>[^\s(]+)\((?P<line>\d+),(?P<col>\d+)\):\s*error\s+(?P<code>[A-Z]+\d+):\s*(?P<msg>.+)$")
            .expect("ts-style regex is valid")
    })
}

fn generic_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // src/lib.rs:42:7: some message   (also matches `file:line: message`)
    RE.get_or_init(|| {
        Regex::new(r"^(?P<file>[^\s:]+\.[a-zA-Z]{1,4}):(?P<line>\d+)(?::(?P<col>\d+))?:?\s*(?P<msg>.+)$")
            .expect("generic regex is valid")
    })
}

fn plain_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // error in src/thing.rs: message
    RE.get_or_init(|| {
        Regex::new(r"(?i)error[^:]*:?\s+(?:in\s+)?(?P<file>[^\s:]+\.[a-zA-Z]{1,4})\b[:\s]*(?P<msg>.*)$")
            .expect("plain-file regex is valid")
    })
}

/// Parse up to [`MAX_PARSED_ERRORS`] error lines from build output
pub fn parse_build_errors(output: &str) -> Vec<BuildErrorLine> {
    let mut errors = Vec::new();

    for line in output.lines() {
        if errors.len() >= MAX_PARSED_ERRORS {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(caps) = ts_style_regex().captures(trimmed) {
            errors.push(BuildErrorLine {
                file: caps["file"].to_string(),
                line: caps["line"].parse().ok(),
                column: caps["col"].parse().ok(),
                code: Some(caps["code"].to_string()),
                message: caps["msg"].trim().to_string(),
                raw: trimmed.to_string(),
            });
            continue;
        }

        // Only treat generic `file:line` shapes as errors when the line
        // looks like one; compiler progress output also matches the shape.
        let lower = trimmed.to_lowercase();
        let looks_like_error = lower.contains("error") || lower.contains("cannot ");

        if looks_like_error {
            if let Some(caps) = generic_regex().captures(trimmed) {
                errors.push(BuildErrorLine {
                    file: caps["file"].to_string(),
                    line: caps["line"].parse().ok(),
                    column: caps.name("col").and_then(|c| c.as_str().parse().ok()),
                    code: None,
                    message: caps["msg"].trim().to_string(),
                    raw: trimmed.to_string(),
                });
                continue;
            }
            if let Some(caps) = plain_file_regex().captures(trimmed) {
                errors.push(BuildErrorLine {
                    file: caps["file"].to_string(),
                    line: None,
                    column: None,
                    code: None,
                    message: if caps["msg"].trim().is_empty() {
                        trimmed.to_string()
                    } else {
                        caps["msg"].trim().to_string()
                    },
                    raw: trimmed.to_string(),
                });
            }
        }
    }

    errors
}

fn rust_summary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // test result: ok. 12 passed; 0 failed; 1 ignored; ...
    RE.get_or_init(|| {
        Regex::new(r"test result:\s*(?:ok|FAILED)\.\s*(?P<passed>\d+)\s+passed;\s*(?P<failed>\d+)\s+failed")
            .expect("rust summary regex is valid")
    })
}

fn generic_summary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 12 passing / 3 failing (mocha-style), or "Tests: 3 failed, 9 passed"
    RE.get_or_init(|| {
        Regex::new(r"(?P<count>\d+)\s+(?P<kind>passing|failing|passed|failed)")
            .expect("generic summary regex is valid")
    })
}

/// Parse test counts from test-runner output. Multiple summary lines (one
/// per test binary) are accumulated. A run with no recognizable summary and
/// a non-zero exit is reported as failed with the raw tail as the error.
pub fn parse_test_output(output: &str, exit_success: bool, duration_ms: u64) -> TestResult {
    let mut passed_tests = 0u32;
    let mut failed_tests = 0u32;
    let mut saw_summary = false;

    for caps in rust_summary_regex().captures_iter(output) {
        saw_summary = true;
        passed_tests += caps["passed"].parse::<u32>().unwrap_or(0);
        failed_tests += caps["failed"].parse::<u32>().unwrap_or(0);
    }

    if !saw_summary {
        for caps in generic_summary_regex().captures_iter(output) {
            saw_summary = true;
            let count: u32 = caps["count"].parse().unwrap_or(0);
            match &caps["kind"] {
                "passing" | "passed" => passed_tests += count,
                _ => failed_tests += count,
            }
        }
    }

    let mut errors: Vec<String> = output
        .lines()
        .filter(|l| {
            let lower = l.to_lowercase();
            lower.contains("failed") && lower.contains("test") || l.trim_start().starts_with("---- ")
        })
        .take(MAX_PARSED_ERRORS)
        .map(|l| l.trim().to_string())
        .collect();

    let passed = if saw_summary {
        failed_tests == 0 && exit_success
    } else {
        exit_success
    };

    if !passed && errors.is_empty() {
        let tail: Vec<&str> = output.lines().rev().take(5).collect();
        errors = tail.into_iter().rev().map(|l| l.to_string()).collect();
    }

    TestResult {
        passed,
        total_tests: passed_tests + failed_tests,
        passed_tests,
        failed_tests,
        errors,
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ts_style_errors() {
        let output = "src/app.ts(12,5): error TS2304: Cannot find name 'foo'.\nsrc/app.ts(20,1): error TS1005: ';' expected.";
        let errors = parse_build_errors(output);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].file, "src/app.ts");
        assert_eq!(errors[0].line, Some(12));
        assert_eq!(errors[0].column, Some(5));
        assert_eq!(errors[0].code.as_deref(), Some("TS2304"));
        assert!(errors[0].message.contains("Cannot find name"));
    }

    #[test]
    fn test_parse_generic_errors() {
        let output = "src/lib.rs:42:7: error: cannot find value `x` in this scope";
        let errors = parse_build_errors(output);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].file, "src/lib.rs");
        assert_eq!(errors[0].line, Some(42));
        assert_eq!(errors[0].column, Some(7));
    }

    #[test]
    fn test_parse_plain_file_errors() {
        let output = "Error in src/foo.ts: unexpected token";
        let errors = parse_build_errors(output);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].file, "src/foo.ts");
    }

    #[test]
    fn test_parse_caps_at_ten_errors() {
        let output = (0..20)
            .map(|i| format!("src/m{}.ts({},1): error TS1005: ';' expected.", i, i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(parse_build_errors(&output).len(), MAX_PARSED_ERRORS);
    }

    #[test]
    fn test_parse_ignores_clean_output() {
        let output = "Compiling kaizen v0.1.0\nFinished dev profile in 2.41s";
        assert!(parse_build_errors(output).is_empty());
    }

    #[test]
    fn test_parse_rust_test_summary() {
        let output = "running 12 tests\n............\ntest result: ok. 12 passed; 0 failed; 0 ignored";
        let result = parse_test_output(output, true, 1500);
        assert!(result.passed);
        assert_eq!(result.total_tests, 12);
        assert_eq!(result.passed_tests, 12);
        assert_eq!(result.failed_tests, 0);
    }

    #[test]
    fn test_parse_failing_rust_tests() {
        let output = "test result: FAILED. 10 passed; 2 failed; 0 ignored";
        let result = parse_test_output(output, false, 800);
        assert!(!result.passed);
        assert_eq!(result.failed_tests, 2);
        assert_eq!(result.total_tests, 12);
    }

    #[test]
    fn test_parse_mocha_style_summary() {
        let output = "  14 passing (2s)\n  3 failing";
        let result = parse_test_output(output, false, 2000);
        assert_eq!(result.passed_tests, 14);
        assert_eq!(result.failed_tests, 3);
        assert!(!result.passed);
    }

    #[test]
    fn test_no_summary_falls_back_to_exit_code() {
        let result = parse_test_output("", true, 10);
        assert!(result.passed);
        assert_eq!(result.total_tests, 0);

        let result = parse_test_output("everything broke", false, 10);
        assert!(!result.passed);
        assert!(!result.errors.is_empty());
    }
}
