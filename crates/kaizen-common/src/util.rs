//! Utility functions and helpers

use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

/// Generate a cycle identifier: timestamp-prefixed so ids sort by creation
pub fn generate_cycle_id() -> String {
    format!(
        "cycle_{}_{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        short_uuid()
    )
}

/// Generate an entity identifier with a type prefix, e.g. `trb_1a2b3c4d`
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, short_uuid())
}

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Short identifier suffix for file names and commit messages
pub fn short_id(id: &str) -> &str {
    let len = id.len();
    if len <= 8 {
        id
    } else {
        &id[len - 8..]
    }
}

/// Lowercased word tokens of a message, punctuation stripped
fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Token-set Jaccard similarity of two messages, in 0.0..=1.0
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Levenshtein distance between two strings
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Levenshtein similarity ratio in 0.0..=1.0. Substring containment counts
/// as fully similar, so `unused import` matches `remove unused import`.
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let (la, lb) = (a.to_lowercase(), b.to_lowercase());
    if !la.is_empty() && !lb.is_empty() && (la.contains(&lb) || lb.contains(&la)) {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&la, &lb) as f64 / max_len as f64
}

/// Truncate a string to at most `max_chars`, appending an ellipsis marker
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}…", truncated)
}

/// Rough token estimate for usage accounting (chars / 4)
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_id_is_sortable_and_unique() {
        let a = generate_cycle_id();
        let b = generate_cycle_id();
        assert!(a.starts_with("cycle_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_jaccard_similarity() {
        assert_eq!(jaccard_similarity("cannot find module x", "cannot find module x"), 1.0);
        assert!(jaccard_similarity("cannot find module x", "cannot find module y") > 0.5);
        assert!(jaccard_similarity("cannot find module", "tests failed badly") < 0.2);
    }

    #[test]
    fn test_levenshtein_similarity() {
        assert_eq!(levenshtein_similarity("abc", "abc"), 1.0);
        assert_eq!(levenshtein_similarity("unused import", "remove unused import"), 1.0);
        assert!(levenshtein_similarity("kitten", "sitting") > 0.5);
        assert!(levenshtein_similarity("abc", "xyz") < 0.4);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 4), "abcd…");
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
