//! Error aggregation with auto-classification
//!
//! Reports arrive from the HTTP surface, the cycle, or the host process.
//! Category and severity are classified from the message when the reporter
//! does not supply them; every report is persisted and assigned an id the
//! reporter can poll.

use chrono::{DateTime, Utc};
use kaizen_common::store::LazyStore;
use kaizen_common::util::generate_id;
use kaizen_common::{Result, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

/// Classification of an aggregated error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Transient,
    Permanent,
    Resource,
    External,
    Configuration,
    Validation,
    Timeout,
    Unknown,
}

/// Lifecycle of an aggregated error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStatus {
    New,
    Queued,
    Repairing,
    Resolved,
    Failed,
    Ignored,
}

/// One repair attempt on an error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub task_id: String,
    pub attempted_at: DateTime<Utc>,
    pub success: bool,
    pub note: Option<String>,
}

/// A persisted aggregated error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedError {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub status: ErrorStatus,
    pub message: String,
    pub stack: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub repair_attempts: Vec<RepairAttempt>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

/// An incoming error report; classification fields are optional
#[derive(Debug, Clone, Default)]
pub struct ErrorReport {
    pub source: String,
    pub message: String,
    pub stack: Option<String>,
    pub category: Option<ErrorCategory>,
    pub severity: Option<Severity>,
    pub context: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ErrorFile {
    errors: Vec<AggregatedError>,
}

/// Persistent error aggregator
pub struct ErrorAggregator {
    store: LazyStore<ErrorFile>,
}

impl ErrorAggregator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: LazyStore::new(path),
        }
    }

    /// Persist a report, classifying category and severity when absent.
    /// Returns the new error id.
    pub async fn report(&self, report: ErrorReport) -> Result<String> {
        let category = report
            .category
            .unwrap_or_else(|| classify_category(&report.message));
        let severity = report
            .severity
            .unwrap_or_else(|| classify_severity(&report.message, category));

        let error = AggregatedError {
            id: generate_id("err"),
            timestamp: Utc::now(),
            source: report.source,
            category,
            severity,
            status: ErrorStatus::New,
            message: report.message,
            stack: report.stack,
            context: report.context,
            repair_attempts: Vec::new(),
            resolved_at: None,
            resolved_by: None,
        };
        let id = error.id.clone();
        info!(
            "Aggregated error {} from '{}' ({:?}/{:?})",
            id, error.source, error.category, error.severity
        );
        self.store.mutate(|file| file.errors.push(error)).await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<AggregatedError> {
        self.store
            .read()
            .await
            .errors
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// All errors with the given status
    pub async fn by_status(&self, status: ErrorStatus) -> Vec<AggregatedError> {
        self.store
            .read()
            .await
            .errors
            .iter()
            .filter(|e| e.status == status)
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<AggregatedError> {
        self.store.read().await.errors.clone()
    }

    /// Update an error's status; resolving stamps `resolved_at`/`by`
    pub async fn update_status(
        &self,
        id: &str,
        status: ErrorStatus,
        resolved_by: Option<String>,
    ) -> Result<bool> {
        self.store
            .mutate(|file| {
                let Some(error) = file.errors.iter_mut().find(|e| e.id == id) else {
                    return false;
                };
                error.status = status;
                if status == ErrorStatus::Resolved {
                    error.resolved_at = Some(Utc::now());
                    error.resolved_by = resolved_by;
                }
                true
            })
            .await
    }

    /// Append a repair attempt to an error's history
    pub async fn record_attempt(
        &self,
        id: &str,
        task_id: &str,
        success: bool,
        note: Option<String>,
    ) -> Result<bool> {
        self.store
            .mutate(|file| {
                let Some(error) = file.errors.iter_mut().find(|e| e.id == id) else {
                    return false;
                };
                error.repair_attempts.push(RepairAttempt {
                    task_id: task_id.to_string(),
                    attempted_at: Utc::now(),
                    success,
                    note,
                });
                true
            })
            .await
    }
}

fn classify_category(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        ErrorCategory::Timeout
    } else if lower.contains("rate limit")
        || lower.contains("econnreset")
        || lower.contains("temporarily")
        || lower.contains("try again")
    {
        ErrorCategory::Transient
    } else if lower.contains("memory")
        || lower.contains("disk")
        || lower.contains("space")
        || lower.contains("resource")
    {
        ErrorCategory::Resource
    } else if lower.contains("config") || lower.contains("missing env") {
        ErrorCategory::Configuration
    } else if lower.contains("invalid") || lower.contains("schema") || lower.contains("parse") {
        ErrorCategory::Validation
    } else if lower.contains("upstream")
        || lower.contains("http")
        || lower.contains("api")
        || lower.contains("network")
    {
        ErrorCategory::External
    } else if lower.contains("not found") || lower.contains("denied") {
        ErrorCategory::Permanent
    } else {
        ErrorCategory::Unknown
    }
}

fn classify_severity(message: &str, category: ErrorCategory) -> Severity {
    let lower = message.to_lowercase();
    if lower.contains("critical") || lower.contains("panic") || lower.contains("fatal") {
        Severity::Critical
    } else {
        match category {
            ErrorCategory::Transient | ErrorCategory::Timeout => Severity::Low,
            ErrorCategory::Resource => Severity::High,
            ErrorCategory::Unknown => Severity::Medium,
            _ => Severity::Medium,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator_in(dir: &tempfile::TempDir) -> ErrorAggregator {
        ErrorAggregator::new(dir.path().join("errors.json"))
    }

    #[tokio::test]
    async fn test_report_classifies_when_unsupplied() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = aggregator_in(&dir);

        let id = aggregator
            .report(ErrorReport {
                source: "watcher".into(),
                message: "Request timed out after 30s".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let error = aggregator.get(&id).await.unwrap();
        assert_eq!(error.category, ErrorCategory::Timeout);
        assert_eq!(error.severity, Severity::Low);
        assert_eq!(error.status, ErrorStatus::New);
    }

    #[tokio::test]
    async fn test_supplied_classification_wins() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = aggregator_in(&dir);

        let id = aggregator
            .report(ErrorReport {
                source: "api".into(),
                message: "timeout while deploying".into(),
                category: Some(ErrorCategory::External),
                severity: Some(Severity::Critical),
                ..Default::default()
            })
            .await
            .unwrap();

        let error = aggregator.get(&id).await.unwrap();
        assert_eq!(error.category, ErrorCategory::External);
        assert_eq!(error.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_status_and_attempt_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = aggregator_in(&dir);

        let id = aggregator
            .report(ErrorReport {
                source: "cycle".into(),
                message: "panic in worker".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        aggregator
            .record_attempt(&id, "task_1", false, Some("first try".into()))
            .await
            .unwrap();
        aggregator
            .update_status(&id, ErrorStatus::Resolved, Some("auto-repair".into()))
            .await
            .unwrap();

        let error = aggregator.get(&id).await.unwrap();
        assert_eq!(error.repair_attempts.len(), 1);
        assert_eq!(error.status, ErrorStatus::Resolved);
        assert!(error.resolved_at.is_some());
        assert_eq!(error.resolved_by.as_deref(), Some("auto-repair"));
    }

    #[test]
    fn test_category_heuristics() {
        assert_eq!(classify_category("rate limit exceeded"), ErrorCategory::Transient);
        assert_eq!(classify_category("out of memory"), ErrorCategory::Resource);
        assert_eq!(classify_category("invalid schema in store"), ErrorCategory::Validation);
        assert_eq!(classify_category("upstream api returned 502"), ErrorCategory::External);
        assert_eq!(classify_category("mystery"), ErrorCategory::Unknown);
    }
}
