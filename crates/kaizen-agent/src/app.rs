//! Dependency container for the agent
//!
//! Everything stateful is constructed once at startup and shared through an
//! `Arc<App>`. Phases, the orchestrator, and the repair worker all borrow
//! from here; nothing reaches for process-wide globals.

use crate::confirmation::ConfirmationStore;
use crate::goals::GoalStore;
use kaizen_common::{AgentConfig, EventBus, Result};
use kaizen_learning::{AbstractionEngine, PatternExtractor, PatternRepository};
use kaizen_provider::{AiProvider, CliProvider, ProviderSet, SubprocessLimits};
use kaizen_queue::{ImprovementQueue, TroubleCollector, TroubleRepository};
use kaizen_repair::{AutoRepairer, ErrorAggregator, RepairQueue};
use kaizen_safety::{
    BreakerConfig, CircuitBreaker, Guard, GuardConfig, SecurityReviewer, SnapshotManager,
};
use std::sync::Arc;
use tracing::info;

/// The assembled agent
pub struct App {
    pub config: AgentConfig,
    pub events: EventBus,
    pub guard: Guard,
    pub snapshots: SnapshotManager,
    pub breaker: Arc<CircuitBreaker>,
    pub patterns: Arc<PatternRepository>,
    pub extractor: PatternExtractor,
    pub abstraction: AbstractionEngine,
    pub queue: ImprovementQueue,
    pub troubles: Arc<TroubleRepository>,
    pub collector: TroubleCollector,
    pub providers: Arc<ProviderSet>,
    pub reviewer: SecurityReviewer,
    pub goals: GoalStore,
    pub confirmations: ConfirmationStore,
    pub aggregator: Arc<ErrorAggregator>,
    pub repair_queue: Arc<RepairQueue>,
}

impl App {
    /// Construct every component from the configuration
    pub async fn bootstrap(config: AgentConfig) -> Result<Arc<Self>> {
        info!(
            "Bootstrapping agent (workspace: {}, project: {})",
            config.workspace_dir.display(),
            config.project_dir.display()
        );
        tokio::fs::create_dir_all(&config.workspace_dir).await?;

        let provider_limits =
            SubprocessLimits::from_secs(config.ai.idle_timeout_secs, config.ai.max_timeout_secs);
        let primary: Option<Arc<dyn AiProvider>> = if config.ai.primary_command.is_empty() {
            None
        } else {
            Some(Arc::new(CliProvider::new(
                config.ai.provider.clone(),
                config.ai.primary_command.clone(),
                config.project_dir.clone(),
                provider_limits.clone(),
            )))
        };
        let secondary: Option<Arc<dyn AiProvider>> = if config.ai.secondary_command.is_empty() {
            None
        } else {
            Some(Arc::new(CliProvider::new(
                config.ai.secondary_provider.clone(),
                config.ai.secondary_command.clone(),
                config.project_dir.clone(),
                provider_limits,
            )))
        };
        let providers = Arc::new(ProviderSet::new(
            primary,
            secondary,
            config.rate_limit_fallback.enabled,
        ));

        Self::assemble(config, providers).await
    }

    /// Assemble the container with an explicit provider set. Used by the
    /// binary via [`App::bootstrap`] and directly by tests that inject
    /// static providers.
    pub async fn assemble(config: AgentConfig, providers: Arc<ProviderSet>) -> Result<Arc<Self>> {
        tokio::fs::create_dir_all(&config.workspace_dir).await?;

        let guard = Guard::new(GuardConfig {
            max_files_per_change: config.limits.max_files_per_change,
            max_lines_per_file: config.limits.max_lines_per_file,
            ..GuardConfig::default()
        });

        let snapshots = SnapshotManager::new(
            config.project_dir.clone(),
            config.snapshots_dir(),
            config.limits.max_snapshots,
        );

        let breaker = Arc::new(
            CircuitBreaker::open(BreakerConfig::default(), config.circuit_breaker_path()).await,
        );

        let patterns = Arc::new(PatternRepository::new(
            config.patterns_path(),
            config.learning_stats_path(),
            config.limits.pattern_history_max,
        ));
        let extractor = PatternExtractor::new(patterns.clone(), config.failure_patterns_path());
        let abstraction = AbstractionEngine::new(
            config.trouble_patterns_path(),
            providers.primary().cloned(),
        );

        let queue = ImprovementQueue::new(config.improvement_queue_path());
        let troubles = Arc::new(TroubleRepository::new(
            config.troubles_path(),
            config.trouble_archive_dir(),
            config.limits.max_active_troubles,
        ));
        let collector = TroubleCollector::new(troubles.clone());

        let reviewer = SecurityReviewer::new(config.ai_review_log_path(), providers.clone());
        let goals = GoalStore::new(config.goals_path());
        let confirmations = ConfirmationStore::new(config.approvals_path());

        let aggregator = Arc::new(ErrorAggregator::new(config.errors_path()));
        let repair_queue = Arc::new(RepairQueue::new(config.repair_queue_path()));

        Ok(Arc::new(App {
            config,
            events: EventBus::new(),
            guard,
            snapshots,
            breaker,
            patterns,
            extractor,
            abstraction,
            queue,
            troubles,
            collector,
            providers,
            reviewer,
            goals,
            confirmations,
            aggregator,
            repair_queue,
        }))
    }

    /// Timeouts for build/test/git subprocesses
    pub fn subprocess_limits(&self) -> SubprocessLimits {
        SubprocessLimits::from_secs(
            self.config.ai.idle_timeout_secs,
            self.config.ai.max_timeout_secs,
        )
    }

    /// Build the auto-repair worker over this container's stores
    pub fn auto_repairer(&self) -> Arc<AutoRepairer> {
        Arc::new(AutoRepairer::new(
            self.aggregator.clone(),
            self.repair_queue.clone(),
            self.breaker.clone(),
            self.providers.clone(),
            self.config.repair.max_attempts_per_task,
        ))
    }
}
