//! Breaker-gated auto-repair worker
//!
//! The worker drains the repair queue one task at a time. Each run asks the
//! circuit breaker first; an open breaker halts the worker without touching
//! the queue (enqueues still succeed). Success resolves the error and
//! counts toward the half-open trial; failure feeds the breaker counters.

use crate::aggregator::{ErrorAggregator, ErrorStatus};
use crate::queue::{RepairPriority, RepairQueue, RepairTask};
use kaizen_common::util::truncate;
use kaizen_common::{Result, Severity};
use kaizen_provider::{CompletionRequest, ProviderSet};
use kaizen_safety::CircuitBreaker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one worker iteration
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub task_id: String,
    pub error_id: String,
    pub success: bool,
    pub summary: String,
}

/// The asynchronous repair worker
pub struct AutoRepairer {
    aggregator: Arc<ErrorAggregator>,
    queue: Arc<RepairQueue>,
    breaker: Arc<CircuitBreaker>,
    providers: Arc<ProviderSet>,
    enabled: AtomicBool,
    running: AtomicBool,
    max_attempts: u32,
}

impl AutoRepairer {
    pub fn new(
        aggregator: Arc<ErrorAggregator>,
        queue: Arc<RepairQueue>,
        breaker: Arc<CircuitBreaker>,
        providers: Arc<ProviderSet>,
        max_attempts: u32,
    ) -> Self {
        Self {
            aggregator,
            queue,
            breaker,
            providers,
            enabled: AtomicBool::new(true),
            running: AtomicBool::new(false),
            max_attempts,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        info!("Auto-repair {}", if enabled { "enabled" } else { "disabled" });
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue repairs for every `new` error, deriving priority from
    /// severity and the default prompt from the error details.
    pub async fn schedule_new_errors(&self) -> Result<usize> {
        let mut scheduled = 0;
        for error in self.aggregator.by_status(ErrorStatus::New).await {
            let priority = match error.severity {
                Severity::Critical => RepairPriority::Urgent,
                Severity::High => RepairPriority::High,
                Severity::Medium => RepairPriority::Normal,
                Severity::Low => RepairPriority::Low,
            };
            let prompt = default_prompt(&error.source, &error.message, error.stack.as_deref());
            if self
                .queue
                .schedule(&error.id, priority, prompt, self.max_attempts)
                .await?
                .is_some()
            {
                self.aggregator
                    .update_status(&error.id, ErrorStatus::Queued, None)
                    .await?;
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    /// One worker iteration: pop the next task if the breaker allows and
    /// run it. Returns `None` when there was nothing to do.
    pub async fn run_once(&self) -> Result<Option<RepairOutcome>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        if !self.breaker.allow().await {
            debug!("Auto-repair halted: circuit breaker is open");
            return Ok(None);
        }

        self.schedule_new_errors().await?;

        let Some(task) = self.queue.next().await? else {
            return Ok(None);
        };

        self.running.store(true, Ordering::SeqCst);
        let outcome = self.execute(&task).await;
        self.running.store(false, Ordering::SeqCst);
        outcome.map(Some)
    }

    async fn execute(&self, task: &RepairTask) -> Result<RepairOutcome> {
        info!(
            "Running repair task {} for error {} (attempt {}/{})",
            task.id, task.error_id, task.current_attempt, task.max_attempts
        );
        self.aggregator
            .update_status(&task.error_id, ErrorStatus::Repairing, None)
            .await?;

        let result = self
            .providers
            .complete(&CompletionRequest::new(task.prompt.clone()))
            .await;

        match result {
            Ok((completion, _served_by)) if !completion.text.trim().is_empty() => {
                let summary = truncate(completion.text.trim(), 400);
                self.queue
                    .complete(&task.id, true, Some(summary.clone()))
                    .await?;
                self.aggregator
                    .record_attempt(&task.error_id, &task.id, true, Some(summary.clone()))
                    .await?;
                self.aggregator
                    .update_status(&task.error_id, ErrorStatus::Resolved, Some("auto-repair".into()))
                    .await?;
                self.breaker.record_success("auto-repair", &task.error_id).await?;
                Ok(RepairOutcome {
                    task_id: task.id.clone(),
                    error_id: task.error_id.clone(),
                    success: true,
                    summary,
                })
            }
            Ok(_) => {
                self.fail(task, "Provider returned an empty repair").await
            }
            Err(e) => {
                warn!("Repair task {} failed: {}", task.id, e);
                self.fail(task, &e.to_string()).await
            }
        }
    }

    async fn fail(&self, task: &RepairTask, reason: &str) -> Result<RepairOutcome> {
        self.queue
            .complete(&task.id, false, Some(reason.to_string()))
            .await?;
        self.aggregator
            .record_attempt(&task.error_id, &task.id, false, Some(reason.to_string()))
            .await?;
        if task.current_attempt >= task.max_attempts {
            self.aggregator
                .update_status(&task.error_id, ErrorStatus::Failed, None)
                .await?;
        }
        self.breaker.record_failure("auto-repair", &task.error_id).await?;
        Ok(RepairOutcome {
            task_id: task.id.clone(),
            error_id: task.error_id.clone(),
            success: false,
            summary: reason.to_string(),
        })
    }

    /// Spawn the background worker loop
    pub fn spawn_worker(self: Arc<Self>, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(Some(outcome)) => {
                        debug!(
                            "Repair worker finished task {} (success: {})",
                            outcome.task_id, outcome.success
                        );
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Repair worker iteration failed: {}", e),
                }
            }
        })
    }
}

fn default_prompt(source: &str, message: &str, stack: Option<&str>) -> String {
    format!(
        "An error was reported by '{}'.\nMessage: {}\n{}\
         Diagnose the likely root cause and describe the minimal fix.",
        source,
        message,
        stack
            .map(|s| format!("Stack trace:\n{}\n", truncate(s, 1000)))
            .unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::ErrorReport;
    use kaizen_provider::StaticProvider;
    use kaizen_safety::{BreakerConfig, BreakerState};

    async fn setup(
        dir: &tempfile::TempDir,
        provider_response: &str,
    ) -> (Arc<ErrorAggregator>, Arc<RepairQueue>, Arc<CircuitBreaker>, AutoRepairer) {
        let aggregator = Arc::new(ErrorAggregator::new(dir.path().join("errors.json")));
        let queue = Arc::new(RepairQueue::new(dir.path().join("repair-queue.json")));
        let breaker = Arc::new(
            CircuitBreaker::open(
                BreakerConfig {
                    max_attempts_per_error: 2,
                    ..Default::default()
                },
                dir.path().join("circuit-breaker.json"),
            )
            .await,
        );
        let providers = Arc::new(ProviderSet::new(
            Some(Arc::new(
                StaticProvider::new("test", vec![]).with_fallback_response(provider_response),
            )),
            None,
            false,
        ));
        let repairer = AutoRepairer::new(
            aggregator.clone(),
            queue.clone(),
            breaker.clone(),
            providers,
            2,
        );
        (aggregator, queue, breaker, repairer)
    }

    #[tokio::test]
    async fn test_successful_repair_resolves_error() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, _queue, _breaker, repairer) = setup(&dir, "Root cause: missing module").await;

        let id = aggregator
            .report(ErrorReport {
                source: "watcher".into(),
                message: "worker crashed".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let outcome = repairer.run_once().await.unwrap().unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.error_id, id);

        let error = aggregator.get(&id).await.unwrap();
        assert_eq!(error.status, ErrorStatus::Resolved);
        assert_eq!(error.resolved_by.as_deref(), Some("auto-repair"));
        assert_eq!(error.repair_attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_repair_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, _queue, breaker, repairer) = setup(&dir, "").await;

        aggregator
            .report(ErrorReport {
                source: "watcher".into(),
                message: "worker crashed".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let outcome = repairer.run_once().await.unwrap().unwrap();
        assert!(!outcome.success);
        assert_eq!(breaker.consecutive_failures_global().await, 1);
    }

    #[tokio::test]
    async fn test_disabled_worker_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, queue, _breaker, repairer) = setup(&dir, "fix").await;
        aggregator
            .report(ErrorReport {
                source: "s".into(),
                message: "m".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        repairer.set_enabled(false);
        assert!(repairer.run_once().await.unwrap().is_none());
        assert_eq!(queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_repeated_failures_open_breaker_and_halt() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, _queue, breaker, repairer) = setup(&dir, "").await;

        aggregator
            .report(ErrorReport {
                source: "s".into(),
                message: "persistent failure".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        // Two attempts on the same error trip max_attempts_per_error = 2
        assert!(repairer.run_once().await.unwrap().is_some());
        assert!(repairer.run_once().await.unwrap().is_some());
        assert_eq!(breaker.state().await, BreakerState::Open);

        // Worker halts while the breaker is open
        aggregator
            .report(ErrorReport {
                source: "s".into(),
                message: "another".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(repairer.run_once().await.unwrap().is_none());
    }
}
