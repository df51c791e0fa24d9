//! Per-cycle trouble buffer with dedup windowing
//!
//! The collector holds troubles in memory for the duration of a cycle and
//! flushes them to the repository in `occurred_at` order at finalization.
//! A capture is rejected when its `(message, file, category)` key matches
//! anything in the pending buffer or in the last twenty persisted troubles
//! loaded at cycle start.

use crate::parse;
use crate::trouble_repository::TroubleRepository;
use chrono::Utc;
use kaizen_common::util::generate_id;
use kaizen_common::{CycleId, Error, Result, Severity, Trouble, TroubleCategory};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Size of the persisted-trouble dedup window loaded at cycle start
const DEDUP_WINDOW: usize = 20;

type DedupKey = (String, Option<String>, TroubleCategory);

/// A trouble before it gets an id and a cycle
#[derive(Debug, Clone)]
pub struct NewTrouble {
    pub phase: String,
    pub category: TroubleCategory,
    pub severity: Severity,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub stack_trace: Option<String>,
    pub context: HashMap<String, serde_json::Value>,
}

impl NewTrouble {
    pub fn new(
        phase: impl Into<String>,
        category: TroubleCategory,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            phase: phase.into(),
            category,
            severity,
            message: message.into(),
            file: None,
            line: None,
            column: None,
            stack_trace: None,
            context: HashMap::new(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_location(mut self, line: Option<u32>, column: Option<u32>) -> Self {
        self.line = line;
        self.column = column;
        self
    }
}

struct CollectorState {
    cycle_id: Option<CycleId>,
    pending: Vec<Trouble>,
    window: Vec<DedupKey>,
}

/// Cycle-scoped trouble collector
pub struct TroubleCollector {
    repository: Arc<TroubleRepository>,
    state: Mutex<CollectorState>,
}

impl TroubleCollector {
    pub fn new(repository: Arc<TroubleRepository>) -> Self {
        Self {
            repository,
            state: Mutex::new(CollectorState {
                cycle_id: None,
                pending: Vec::new(),
                window: Vec::new(),
            }),
        }
    }

    /// Prime the collector for a new cycle: clears the pending buffer and
    /// loads the recent persisted troubles into the dedup window.
    pub async fn begin_cycle(&self, cycle_id: &str) {
        let recent = self.repository.recent(DEDUP_WINDOW).await;
        let mut state = self.state.lock().await;
        state.cycle_id = Some(cycle_id.to_string());
        state.pending.clear();
        state.window = recent.iter().map(|t| t.dedup_key()).collect();
        debug!(
            "Trouble collector primed for {} ({} keys in dedup window)",
            cycle_id,
            state.window.len()
        );
    }

    /// Capture a trouble. Returns the new trouble id, or `None` when the
    /// capture was deduplicated.
    pub async fn capture(&self, new: NewTrouble) -> Option<String> {
        let mut state = self.state.lock().await;
        let key: DedupKey = (new.message.clone(), new.file.clone(), new.category);

        let duplicate = state.window.contains(&key)
            || state.pending.iter().any(|t| t.dedup_key() == key);
        if duplicate {
            debug!("Deduplicated trouble: {}", new.message);
            return None;
        }

        let trouble = Trouble {
            id: generate_id("trb"),
            cycle_id: state.cycle_id.clone().unwrap_or_else(|| "none".to_string()),
            phase: new.phase,
            category: new.category,
            severity: new.severity,
            message: new.message,
            file: new.file,
            line: new.line,
            column: new.column,
            stack_trace: new.stack_trace,
            context: new.context,
            resolved: false,
            resolved_by: None,
            occurred_at: Utc::now(),
            resolved_at: None,
        };
        let id = trouble.id.clone();
        state.pending.push(trouble);
        Some(id)
    }

    /// Capture from an error value, classifying by its category
    pub async fn capture_error(&self, phase: &str, error: &Error) -> Option<String> {
        let category = match error {
            Error::Git(_) | Error::Subprocess(_) => TroubleCategory::BuildError,
            Error::Policy(_) => TroubleCategory::SecurityIssue,
            Error::Configuration(_) => TroubleCategory::ConfigError,
            Error::Validation(_) | Error::Serialization(_) => TroubleCategory::Other,
            Error::Timeout(_) => TroubleCategory::PerformanceIssue,
            _ => TroubleCategory::RuntimeError,
        };
        let severity = match error.kind() {
            kaizen_common::ErrorKind::Fatal => Severity::Critical,
            kaizen_common::ErrorKind::Policy => Severity::High,
            _ => Severity::Medium,
        };
        self.capture(NewTrouble::new(phase, category, severity, error.to_string()))
            .await
    }

    /// Parse build output and capture each error line as a trouble
    pub async fn capture_build_output(&self, phase: &str, output: &str) -> usize {
        let mut captured = 0;
        for error in parse::parse_build_errors(output) {
            let category = match error.code.as_deref() {
                Some(code) if code.starts_with("TS2") => TroubleCategory::TypeError,
                Some(_) => TroubleCategory::BuildError,
                None => TroubleCategory::BuildError,
            };
            let new = NewTrouble::new(phase, category, Severity::High, error.message)
                .with_file(error.file)
                .with_location(error.line, error.column);
            if self.capture(new).await.is_some() {
                captured += 1;
            }
        }
        captured
    }

    /// Capture failing tests from test-runner output
    pub async fn capture_test_output(&self, phase: &str, output: &str) -> usize {
        let result = parse::parse_test_output(output, false, 0);
        let mut captured = 0;
        for error in result.errors {
            let new = NewTrouble::new(phase, TroubleCategory::TestFailure, Severity::High, error);
            if self.capture(new).await.is_some() {
                captured += 1;
            }
        }
        captured
    }

    /// Capture a duplicate-name conflict between two files
    pub async fn capture_naming_conflict(
        &self,
        phase: &str,
        name: &str,
        first: &str,
        second: &str,
    ) -> Option<String> {
        let new = NewTrouble::new(
            phase,
            TroubleCategory::NamingConflict,
            Severity::Medium,
            format!("Duplicate name '{}' in {} and {}", name, first, second),
        )
        .with_file(second.to_string());
        self.capture(new).await
    }

    /// Pending troubles, in capture order
    pub async fn pending(&self) -> Vec<Trouble> {
        self.state.lock().await.pending.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Flush pending troubles into the repository, ordered by `occurred_at`.
    /// Returns the number of flushed records.
    pub async fn flush(&self) -> Result<usize> {
        let pending = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.pending)
        };
        let count = pending.len();
        if count > 0 {
            self.repository.append(pending).await?;
            info!("Flushed {} troubles to the repository", count);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector_in(dir: &tempfile::TempDir) -> TroubleCollector {
        let repo = Arc::new(TroubleRepository::new(
            dir.path().join("troubles.json"),
            dir.path().join("troubles-archive"),
            1000,
        ));
        TroubleCollector::new(repo)
    }

    fn sample(message: &str) -> NewTrouble {
        NewTrouble::new(
            "verify",
            TroubleCategory::BuildError,
            Severity::High,
            message,
        )
        .with_file("src/foo.ts")
    }

    #[tokio::test]
    async fn test_capture_dedups_within_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let collector = collector_in(&dir);
        collector.begin_cycle("cycle_a").await;

        assert!(collector.capture(sample("Cannot find module 'x'")).await.is_some());
        assert!(collector.capture(sample("Cannot find module 'x'")).await.is_none());
        assert_eq!(collector.pending_count().await, 1);

        // Same message in a different category is a distinct incident
        let other = NewTrouble::new(
            "verify",
            TroubleCategory::TestFailure,
            Severity::High,
            "Cannot find module 'x'",
        )
        .with_file("src/foo.ts");
        assert!(collector.capture(other).await.is_some());
    }

    #[tokio::test]
    async fn test_dedup_window_spans_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let collector = collector_in(&dir);

        collector.begin_cycle("cycle_a").await;
        collector.capture(sample("Cannot find module 'x'")).await;
        collector.flush().await.unwrap();

        // Cycle B re-observes the same error before flush
        collector.begin_cycle("cycle_b").await;
        assert!(collector.capture(sample("Cannot find module 'x'")).await.is_none());
        assert_eq!(collector.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_capture_build_output() {
        let dir = tempfile::tempdir().unwrap();
        let collector = collector_in(&dir);
        collector.begin_cycle("cycle_a").await;

        let output = "src/app.ts(12,5): error TS2304: Cannot find name 'foo'.";
        assert_eq!(collector.capture_build_output("verify", output).await, 1);

        let pending = collector.pending().await;
        assert_eq!(pending[0].category, TroubleCategory::TypeError);
        assert_eq!(pending[0].file.as_deref(), Some("src/app.ts"));
        assert_eq!(pending[0].line, Some(12));
    }

    #[tokio::test]
    async fn test_flush_orders_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let collector = collector_in(&dir);
        collector.begin_cycle("cycle_a").await;

        collector.capture(sample("first")).await;
        collector.capture(sample("second")).await;
        assert_eq!(collector.flush().await.unwrap(), 2);
        assert_eq!(collector.pending_count().await, 0);
        // Second flush is a no-op
        assert_eq!(collector.flush().await.unwrap(), 0);
    }
}
