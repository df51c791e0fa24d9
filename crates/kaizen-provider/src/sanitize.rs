//! Output scrubbing and generated-artifact validation
//!
//! Provider CLIs decorate their output with ANSI color codes, OSC title
//! sequences, and the occasional stray control character; all of that is
//! stripped before the text reaches any other component. Generated code
//! additionally passes a lightweight validation gate (control characters,
//! bracket balance, per-extension checks) before it may be written to disk.

use regex::Regex;
use std::sync::OnceLock;

fn ansi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // CSI sequences, OSC sequences (BEL or ST terminated), and single-char escapes
    RE.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
            .expect("ANSI regex is valid")
    })
}

/// Strip ANSI/OSC escape sequences and non-whitespace control characters
pub fn scrub_control_sequences(text: &str) -> String {
    let without_escapes = ansi_regex().replace_all(text, "");
    without_escapes
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

/// Extract the body of the first fenced code block, if the text contains
/// one; otherwise return the text unchanged. Providers frequently wrap
/// whole-file artifacts in markdown fences.
pub fn extract_code_block(text: &str) -> String {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after_fence = &trimmed[start + 3..];
    // Skip the optional language tag on the fence line
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim_end().to_string(),
        None => body.trim_end().to_string(),
    }
}

/// Validation outcome for a generated artifact
#[derive(Debug, Clone)]
pub struct ArtifactReport {
    pub valid: bool,
    pub problems: Vec<String>,
}

/// Check bracket balance outside of string literals and line comments.
/// This is a heuristic gate, not a parser; it catches the truncated or
/// mangled artifacts providers produce under rate pressure. Single quotes
/// only count as delimiters for short char-literal shapes, so Rust
/// lifetimes and stray apostrophes do not swallow the rest of a line.
pub fn check_bracket_balance(code: &str) -> Result<(), String> {
    let mut stack: Vec<(char, usize)> = Vec::new();

    for (line_no, line) in code.lines().enumerate() {
        let chars: Vec<char> = line.chars().collect();
        let mut index = 0;
        let mut in_string: Option<char> = None;
        let mut escaped = false;

        while index < chars.len() {
            let c = chars[index];
            if let Some(quote) = in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    in_string = None;
                }
                index += 1;
                continue;
            }
            match c {
                '"' | '`' => in_string = Some(c),
                '\'' => {
                    // 'x' or '\n' are char literals; anything else is a
                    // lifetime or apostrophe and stays inert
                    if chars.get(index + 1) == Some(&'\\') && chars.get(index + 3) == Some(&'\'') {
                        index += 4;
                        continue;
                    }
                    if chars.get(index + 2) == Some(&'\'') {
                        index += 3;
                        continue;
                    }
                }
                '/' if chars.get(index + 1) == Some(&'/') => break,
                '#' => break,
                '(' | '[' | '{' => stack.push((c, line_no + 1)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, at)) => {
                            return Err(format!(
                                "Mismatched '{}' at line {} (unclosed '{}' from line {})",
                                c,
                                line_no + 1,
                                open,
                                at
                            ));
                        }
                        None => {
                            return Err(format!("Unmatched '{}' at line {}", c, line_no + 1));
                        }
                    }
                }
                _ => {}
            }
            index += 1;
        }
    }

    if let Some((open, at)) = stack.pop() {
        return Err(format!("Unclosed '{}' from line {}", open, at));
    }
    Ok(())
}

/// Validate a generated artifact for the given file extension
pub fn validate_artifact(extension: &str, content: &str) -> ArtifactReport {
    let mut problems = Vec::new();

    if content.trim().is_empty() {
        problems.push("Artifact is empty".to_string());
    }

    if content
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        problems.push("Artifact contains control characters".to_string());
    }

    match extension {
        "json" => {
            if let Err(e) = serde_json::from_str::<serde_json::Value>(content) {
                problems.push(format!("Invalid JSON: {}", e));
            }
        }
        "rs" | "ts" | "js" | "tsx" | "jsx" | "go" | "java" | "c" | "cpp" | "py" => {
            if let Err(e) = check_bracket_balance(content) {
                problems.push(e);
            }
        }
        _ => {}
    }

    ArtifactReport {
        valid: problems.is_empty(),
        problems,
    }
}
