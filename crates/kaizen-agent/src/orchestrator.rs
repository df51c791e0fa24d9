//! Cycle orchestration
//!
//! Enforces the cycle contract: at most one cycle at a time, skip when
//! there is no work, run the eight phases in order, run the feedback and
//! abstraction post-processing, finalize always, and pause the system
//! after too many consecutive critical failures.

use crate::app::App;
use crate::confirmation::ConfirmationStatus;
use crate::context::{CycleContext, CycleResult, CycleSummary};
use crate::phases::{default_pipeline, Phase};
use crate::work_detector::WorkDetector;
use async_trait::async_trait;
use kaizen_common::util::generate_cycle_id;
use kaizen_common::{
    AgentEvent, Error, ImprovementKind, PhaseKind, QueueStatus, Result, Severity, TroubleCategory,
};
use kaizen_learning::abstraction::suggestion_priority;
use kaizen_learning::{ExtractionContext, FailureObservation};
use kaizen_provider::CompletionRequest;
use kaizen_queue::{NewImprovement, NewTrouble};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// External collaborator: the research subsystem
#[async_trait]
pub trait ResearchRunner: Send + Sync {
    /// Run a research pass; returns how many topics were queued
    async fn run(&self, max_topics: u32) -> Result<u32>;
}

/// External collaborator: the documentation updater
#[async_trait]
pub trait DocumentUpdater: Send + Sync {
    async fn update(&self, targets: &[String]) -> Result<()>;
}

/// Default no-op collaborators wired by the binary
pub struct NoopResearch;

#[async_trait]
impl ResearchRunner for NoopResearch {
    async fn run(&self, _max_topics: u32) -> Result<u32> {
        Ok(0)
    }
}

pub struct NoopDocs;

#[async_trait]
impl DocumentUpdater for NoopDocs {
    async fn update(&self, _targets: &[String]) -> Result<()> {
        Ok(())
    }
}

/// Orchestrator status for the observer surface
#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    pub is_running: bool,
    pub current_cycle_id: Option<String>,
    pub phases: Vec<&'static str>,
    pub consecutive_failures: u32,
    pub system_paused: bool,
    pub cycle_count: u64,
}

/// The cycle engine
pub struct Orchestrator {
    app: Arc<App>,
    phases: Vec<Box<dyn Phase>>,
    cycle_active: AtomicBool,
    current_cycle: Mutex<Option<String>>,
    consecutive_failures: AtomicU32,
    system_paused: AtomicBool,
    cycle_count: AtomicU64,
    research: Arc<dyn ResearchRunner>,
    docs: Arc<dyn DocumentUpdater>,
}

impl Orchestrator {
    pub fn new(app: Arc<App>) -> Self {
        Self::with_collaborators(app, Arc::new(NoopResearch), Arc::new(NoopDocs))
    }

    pub fn with_collaborators(
        app: Arc<App>,
        research: Arc<dyn ResearchRunner>,
        docs: Arc<dyn DocumentUpdater>,
    ) -> Self {
        Self {
            app,
            phases: default_pipeline(),
            cycle_active: AtomicBool::new(false),
            current_cycle: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            system_paused: AtomicBool::new(false),
            cycle_count: AtomicU64::new(0),
            research,
            docs,
        }
    }

    /// Run one improvement cycle. A concurrent caller gets
    /// [`Error::CycleInProgress`] without side effects; a paused system
    /// returns a `paused_…` result without running phases; no work returns
    /// a successful `skipped_…` result.
    pub async fn run_cycle(&self) -> Result<CycleResult> {
        // Admission: single-cycle gate, test-and-set
        if self
            .cycle_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::CycleInProgress);
        }

        if self.system_paused.load(Ordering::SeqCst) {
            self.cycle_active.store(false, Ordering::SeqCst);
            return Ok(CycleResult::paused());
        }

        // Work check
        let work = WorkDetector::detect(&self.app).await;
        if !work.has_work {
            self.cycle_active.store(false, Ordering::SeqCst);
            info!("Cycle skipped: {}", work.reason);
            return Ok(CycleResult::skipped());
        }

        let result = self.run_cycle_inner(&work.reason).await;
        self.cycle_active.store(false, Ordering::SeqCst);
        *self.current_cycle.lock().await = None;
        result
    }

    async fn run_cycle_inner(&self, work_reason: &str) -> Result<CycleResult> {
        // Initialization
        let cycle_id = generate_cycle_id();
        *self.current_cycle.lock().await = Some(cycle_id.clone());
        self.cycle_count.fetch_add(1, Ordering::SeqCst);
        let started = std::time::Instant::now();

        info!("Cycle {} starting ({})", cycle_id, work_reason);
        let mut ctx = CycleContext::new(cycle_id.clone());
        ctx.active_goals = self.app.goals.active().await;
        self.app.collector.begin_cycle(&cycle_id).await;

        match self.app.snapshots.create(Some("cycle start")).await {
            Ok(id) => ctx.snapshot_id = Some(id),
            Err(e) => warn!("Could not snapshot the workspace: {}", e),
        }

        self.app.events.emit(AgentEvent::CycleStarted {
            cycle_id: cycle_id.clone(),
        });

        // Pending-review pre-pass for fallback-produced changes
        if self.app.config.rate_limit_fallback.auto_review {
            self.review_pending_confirmations(&mut ctx).await;
        }

        // Pipeline
        for phase in &self.phases {
            let kind = phase.kind();
            self.app.events.emit(AgentEvent::PhaseStarted {
                cycle_id: cycle_id.clone(),
                phase: kind,
            });
            let result = phase.execute(&self.app, &mut ctx).await;
            self.app.events.emit(AgentEvent::PhaseCompleted {
                cycle_id: cycle_id.clone(),
                phase: kind,
                success: result.success,
            });

            if !result.success {
                warn!("Phase {} failed: {}", kind, result.message);
                ctx.record_failure(kind, result.message.clone());
            } else {
                debug!("Phase {} completed: {}", kind, result.message);
            }
            if result.should_stop {
                info!("Phase {} requested stop: {}", kind, result.message);
                break;
            }
        }

        // Post-processing; failures here are logged, never fatal
        if let Err(e) = self.post_process(&mut ctx).await {
            warn!("Post-processing failed: {}", e);
        }

        // Finalization always runs
        let result = self.finalize(&mut ctx, started).await;

        // Failure accounting
        if ctx.has_critical_failure {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures >= self.app.config.limits.max_consecutive_failures {
                error!(
                    "{} consecutive critical failures; pausing the system",
                    failures
                );
                self.system_paused.store(true, Ordering::SeqCst);
                self.app.events.emit(AgentEvent::Error {
                    message: format!(
                        "system paused after {} consecutive critical failures",
                        failures
                    ),
                });
            }
        } else {
            self.consecutive_failures.store(0, Ordering::SeqCst);
        }

        Ok(result)
    }

    /// Re-review changes produced under a fallback provider. Bounded per
    /// cycle; primary unavailability leaves items pending.
    async fn review_pending_confirmations(&self, ctx: &mut CycleContext) {
        let limit = self.app.config.limits.max_confirmations_per_cycle;
        let pending = self.app.confirmations.pending(limit).await;
        if pending.is_empty() {
            return;
        }

        let Some(primary) = self.app.providers.primary() else {
            return;
        };
        if !primary.is_available().await {
            debug!("Primary provider unavailable; confirmations stay pending");
            return;
        }

        for item in pending {
            let content = tokio::fs::read_to_string(self.app.config.project_dir.join(&item.file))
                .await
                .unwrap_or_default();
            let prompt = format!(
                "A fallback model previously made this change while the primary was rate limited.\n\
                 File: {}\nChange: {}\nCurrent content:\n```\n{}\n```\n\
                 Respond with JSON only: {{\"approved\": true|false, \"reason\": \"...\"}}.",
                item.file, item.description, content
            );
            ctx.ai_calls += 1;
            let status = match primary.complete(&CompletionRequest::new(prompt)).await {
                Ok(completion) => {
                    ctx.token_usage.add(completion.usage);
                    if completion.text.contains("\"approved\": true")
                        || completion.text.contains("\"approved\":true")
                    {
                        ConfirmationStatus::Confirmed
                    } else {
                        ConfirmationStatus::NeedsReview
                    }
                }
                Err(e) => {
                    warn!("Confirmation review failed: {}", e);
                    continue;
                }
            };
            if let Err(e) = self.app.confirmations.mark(&item.id, status, None).await {
                warn!("Could not update confirmation {}: {}", item.id, e);
            }
        }
    }

    async fn post_process(&self, ctx: &mut CycleContext) -> Result<()> {
        self.feedback_loop(ctx).await?;

        // Abstraction over this cycle's troubles
        let pending = self.app.collector.pending().await;
        if !pending.is_empty() {
            let outcome = self.app.abstraction.analyze(&pending).await?;
            for (pattern, suggestion) in outcome.new_suggestions {
                let priority = suggestion_priority(&pattern, &suggestion);
                let enqueue = self
                    .app
                    .queue
                    .enqueue(NewImprovement {
                        related_pattern_id: Some(pattern.id.clone()),
                        prevention_suggestion_id: Some(suggestion.id.clone()),
                        ..NewImprovement::new(
                            "abstraction",
                            ImprovementKind::Prevention,
                            suggestion.description.clone(),
                            format!("Prevent recurring trouble: {}", pattern.name),
                            priority,
                        )
                    })
                    .await;
                if let Err(e) = enqueue {
                    warn!("Could not queue prevention suggestion: {}", e);
                }
            }
        }

        // Pattern maintenance every tenth cycle
        if self.cycle_count.load(Ordering::SeqCst) % 10 == 0 {
            match self.app.patterns.prune_ineffective().await {
                Ok(removed) if removed > 0 => info!("Pruned {} ineffective patterns", removed),
                Ok(_) => {}
                Err(e) => warn!("Pattern pruning failed: {}", e),
            }
            match self.app.patterns.prune_stale().await {
                Ok(removed) if removed > 0 => info!("Pruned {} stale patterns", removed),
                Ok(_) => {}
                Err(e) => warn!("Stale pattern pruning failed: {}", e),
            }
        }

        // Document update; warning only
        let docs = &self.app.config.docs;
        if docs.enabled
            && docs.update_frequency > 0
            && self.cycle_count.load(Ordering::SeqCst) % docs.update_frequency == 0
        {
            if let Err(e) = self.docs.update(&docs.targets).await {
                warn!("Document update failed: {}", e);
            }
        }

        // Research trigger
        let research = &self.app.config.research;
        if research.enabled
            && research.frequency > 0
            && self.cycle_count.load(Ordering::SeqCst) % research.frequency == 0
        {
            match self.research.run(research.max_topics_per_cycle).await {
                Ok(queued) => info!("Research pass queued {} topics", queued),
                Err(e) => warn!("Research pass failed: {}", e),
            }
        }

        Ok(())
    }

    /// Learn from the cycle: extract patterns on success, record
    /// anti-patterns on failure, and update confidence for every pattern
    /// used this cycle.
    async fn feedback_loop(&self, ctx: &mut CycleContext) -> Result<()> {
        let tests_passed = ctx.test_results.as_ref().map(|t| t.passed).unwrap_or(false);
        let cycle_succeeded =
            tests_passed && !ctx.has_critical_failure && !ctx.implemented_changes.is_empty();

        if cycle_succeeded {
            if let Some(plan) = &ctx.plan {
                let file = plan.affected_files.first().cloned();
                let extraction = ExtractionContext {
                    problem: plan.description.clone(),
                    file,
                    error_code: None,
                    before: None,
                    after: None,
                };
                match self.app.extractor.extract_from_success(&extraction).await {
                    Ok(Some(pattern_id)) => {
                        self.app
                            .patterns
                            .update_confidence(&pattern_id, true)
                            .await?;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Pattern extraction failed: {}", e),
                }
            }
        } else if ctx.has_critical_failure || ctx.test_results.is_some() {
            // Record an anti-pattern trouble so the abstraction engine
            // learns from the failure.
            let category = match ctx.failed_phase {
                Some(PhaseKind::Verify) if !tests_passed && ctx.test_results.is_some() => {
                    TroubleCategory::TestFailure
                }
                Some(PhaseKind::Verify) => TroubleCategory::BuildError,
                Some(PhaseKind::Implement) => TroubleCategory::RuntimeError,
                _ => TroubleCategory::Other,
            };
            let reason = ctx
                .failure_reason
                .clone()
                .unwrap_or_else(|| "cycle did not produce a passing change".to_string());
            self.app
                .collector
                .capture(NewTrouble::new("feedback", category, Severity::High, reason.clone()))
                .await;

            if let Some(plan) = &ctx.plan {
                let observation = FailureObservation {
                    trouble_category: category,
                    trouble_message: reason,
                    trouble_file: plan.affected_files.first().cloned(),
                    attempted_fixes: vec![plan.description.clone()],
                    failure_reason: ctx
                        .failed_phase
                        .map(|p| format!("phase {} failed", p))
                        .unwrap_or_else(|| "unknown".to_string()),
                };
                if let Err(e) = self.app.extractor.record_failure(observation).await {
                    warn!("Could not record failure pattern: {}", e);
                }
            }
        }

        // Confidence updates for every pattern used this cycle
        for pattern_id in ctx.used_patterns.clone() {
            if let Err(e) = self
                .app
                .patterns
                .update_confidence(&pattern_id, cycle_succeeded)
                .await
            {
                warn!("Confidence update failed for {}: {}", pattern_id, e);
            }
        }

        Ok(())
    }

    async fn finalize(&self, ctx: &mut CycleContext, started: std::time::Instant) -> CycleResult {
        if let Err(e) = self.app.goals.save_progress(&ctx.goal_progress).await {
            warn!("Could not persist goal progress: {}", e);
        }
        if let Err(e) = self
            .app
            .patterns
            .record_token_usage(ctx.token_usage.prompt_tokens, ctx.token_usage.completion_tokens)
            .await
        {
            warn!("Could not persist token usage: {}", e);
        }
        if let Err(e) = self
            .app
            .patterns
            .record_cycle_completion(ctx.pattern_matches, ctx.ai_calls)
            .await
        {
            warn!("Could not record cycle completion: {}", e);
        }

        // Troubles: populate the context, then flush
        ctx.troubles = self.app.collector.pending().await;
        for trouble in &ctx.troubles {
            self.app.events.emit(AgentEvent::TroubleCaptured {
                cycle_id: ctx.cycle_id.clone(),
                trouble_id: trouble.id.clone(),
                category: trouble.category.as_str().to_string(),
            });
        }
        let trouble_count = match self.app.collector.flush().await {
            Ok(count) => count,
            Err(e) => {
                warn!("Trouble flush failed: {}", e);
                ctx.troubles.len()
            }
        };

        if let Err(e) = self.app.queue.cleanup(self.app.config.limits.cleanup_days).await {
            warn!("Queue cleanup failed: {}", e);
        }

        self.close_queue_items(ctx).await;

        let quality = ctx.quality();
        let success = ctx.is_success();
        let tests_passed = ctx.test_results.as_ref().map(|t| t.passed);

        let should_retry = !self.system_paused.load(Ordering::SeqCst)
            && (tests_passed == Some(false) || trouble_count > 0 || ctx.has_critical_failure);
        let retry_reason = if !should_retry {
            None
        } else if ctx.failed_phase == Some(PhaseKind::Verify) || tests_passed == Some(false) {
            Some("build or test verification failed".to_string())
        } else if ctx.has_critical_failure {
            Some(format!(
                "critical failure in {}",
                ctx.failed_phase.map(|p| p.as_str()).unwrap_or("cycle")
            ))
        } else {
            Some("troubles were captured".to_string())
        };

        let summary = CycleSummary {
            issue_count: ctx.issues.len(),
            improvement_count: ctx.improvements.len(),
            change_count: ctx.implemented_changes.len(),
            test_summary: ctx.test_results.as_ref().map(|t| {
                format!("{}/{} passed", t.passed_tests, t.total_tests)
            }),
            token_total: ctx.token_usage.total(),
        };

        let result = CycleResult {
            cycle_id: ctx.cycle_id.clone(),
            success,
            duration_ms: started.elapsed().as_millis() as u64,
            trouble_count,
            should_retry,
            retry_reason,
            failed_phase: ctx.failed_phase,
            skipped_early: false,
            quality,
            summary,
        };

        ctx.release();
        self.app.events.emit(AgentEvent::CycleCompleted {
            cycle_id: ctx.cycle_id.clone(),
            success,
        });
        info!(
            "Cycle {} finished: success={} quality={} troubles={} ({}ms)",
            result.cycle_id, result.success, result.quality.as_str(), result.trouble_count, result.duration_ms
        );
        result
    }

    /// Close out queue-sourced improvements: the plan target becomes
    /// completed/failed, anything else dequeued this cycle returns to
    /// pending for a later cycle.
    async fn close_queue_items(&self, ctx: &CycleContext) {
        let target_id = ctx.plan.as_ref().and_then(|p| p.target_improvement.clone());
        for improvement in ctx.improvements.iter().filter(|i| i.source == "queue") {
            let is_target = target_id.as_deref() == Some(improvement.id.as_str());
            let (status, result) = if is_target && ctx.is_success() {
                (QueueStatus::Completed, Some("applied".to_string()))
            } else if is_target {
                (
                    QueueStatus::Failed,
                    ctx.failure_reason.clone().or(Some("cycle failed".to_string())),
                )
            } else {
                (QueueStatus::Pending, None)
            };
            if let Err(e) = self
                .app
                .queue
                .update_status(&improvement.id, status, Some(ctx.cycle_id.clone()), result)
                .await
            {
                warn!("Could not update queue item {}: {}", improvement.id, e);
            }
        }
    }

    /// Forced research-only cycle; mutually exclusive with `run_cycle`
    pub async fn run_research_cycle(&self) -> Result<u32> {
        if self
            .cycle_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::CycleInProgress);
        }
        let result = self
            .research
            .run(self.app.config.research.max_topics_per_cycle)
            .await;
        self.cycle_active.store(false, Ordering::SeqCst);
        result
    }

    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            is_running: self.cycle_active.load(Ordering::SeqCst),
            current_cycle_id: self.current_cycle.lock().await.clone(),
            phases: PhaseKind::ALL.iter().map(|p| p.as_str()).collect(),
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            system_paused: self.system_paused.load(Ordering::SeqCst),
            cycle_count: self.cycle_count.load(Ordering::SeqCst),
        }
    }

    /// Clear the pause and reset the failure counter
    pub fn resume_system(&self) {
        info!("System resumed");
        self.system_paused.store(false, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Reset only the failure counter
    pub fn reset_failure_counter(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}
