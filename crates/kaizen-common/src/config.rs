//! Configuration management for the Kaizen agent
//!
//! The configuration is loaded from a JSON file and merged onto defaults:
//! every field carries `#[serde(default)]`, so a partial `config.json` only
//! overrides what it names.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Root directory for all agent state (stores, snapshots, logs)
    pub workspace_dir: PathBuf,
    /// Root of the project the agent improves
    pub project_dir: PathBuf,
    /// Scheduler tick for the improvement cycle, in seconds
    pub check_interval_secs: u64,
    pub build: BuildConfig,
    pub ai: AiConfig,
    pub git: GitConfig,
    pub docs: DocsConfig,
    pub rate_limit_fallback: FallbackConfig,
    pub research: ResearchConfig,
    pub repair: RepairConfig,
    pub limits: LimitsConfig,
}

/// Build and test subprocess commands, argv form only
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub build_command: Vec<String>,
    pub test_command: Vec<String>,
    /// Optional circular-dependency detector; non-empty output means cycles
    pub circular_check_command: Vec<String>,
}

/// AI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Name of the primary provider, used in logs and review records
    pub provider: String,
    /// Argv for the primary provider CLI; the prompt is appended as the
    /// final argument
    pub primary_command: Vec<String>,
    /// Argv for the secondary (fallback) provider CLI, if any
    pub secondary_command: Vec<String>,
    /// Name of the secondary provider
    pub secondary_provider: String,
    /// Kill a provider subprocess after this many seconds without output
    pub idle_timeout_secs: u64,
    /// Kill a provider subprocess after this many seconds total
    pub max_timeout_secs: u64,
}

/// Git behavior around verification commits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub auto_push: bool,
    pub push_remote: String,
    pub allow_protected_branch_push: bool,
    pub auto_update_gitignore: bool,
}

/// Documentation update collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocsConfig {
    pub enabled: bool,
    /// Run the document updater every N cycles
    pub update_frequency: u64,
    pub targets: Vec<String>,
}

/// Fallback-provider policy when the primary is rate limited
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub fallback_provider: String,
    /// Record fallback-produced changes in the confirmation queue
    pub track_changes: bool,
    /// Re-review tracked changes with the primary provider on later cycles
    pub auto_review: bool,
    pub review_on_phases: Vec<String>,
}

/// Research subsystem trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub enabled: bool,
    /// Run research every N cycles
    pub frequency: u64,
    pub max_topics_per_cycle: u32,
    pub min_confidence_to_queue: f32,
}

/// Asynchronous auto-repair worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub enabled: bool,
    /// Worker poll interval in seconds
    pub poll_interval_secs: u64,
    pub max_attempts_per_task: u32,
}

/// Process-wide resource bounds, tunable via config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_files_per_change: usize,
    pub max_lines_per_file: usize,
    pub max_snapshots: usize,
    pub max_active_troubles: usize,
    pub cleanup_days: i64,
    pub max_consecutive_failures: u32,
    pub max_confirmations_per_cycle: usize,
    pub pattern_history_max: usize,
    pub default_improvement_priority: u8,
    pub max_verify_retries: u32,
    pub max_generation_attempts: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("./workspace"),
            project_dir: PathBuf::from("."),
            check_interval_secs: 300, // 5 minutes
            build: BuildConfig::default(),
            ai: AiConfig::default(),
            git: GitConfig::default(),
            docs: DocsConfig::default(),
            rate_limit_fallback: FallbackConfig::default(),
            research: ResearchConfig::default(),
            repair: RepairConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            build_command: vec!["cargo".into(), "build".into()],
            test_command: vec!["cargo".into(), "test".into()],
            circular_check_command: Vec::new(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "claude".to_string(),
            primary_command: Vec::new(),
            secondary_command: Vec::new(),
            secondary_provider: "opencode".to_string(),
            idle_timeout_secs: 180, // 3 minutes without output
            max_timeout_secs: 600,  // 10 minutes total
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            auto_push: false,
            push_remote: "origin".to_string(),
            allow_protected_branch_push: false,
            auto_update_gitignore: false,
        }
    }
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            update_frequency: 5,
            targets: Vec::new(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fallback_provider: "opencode".to_string(),
            track_changes: true,
            auto_review: true,
            review_on_phases: vec!["implement".to_string(), "test-gen".to_string()],
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: 10,
            max_topics_per_cycle: 3,
            min_confidence_to_queue: 0.6,
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 30,
            max_attempts_per_task: 3,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_files_per_change: 5,
            max_lines_per_file: 500,
            max_snapshots: 10,
            max_active_troubles: 1000,
            cleanup_days: 14,
            max_consecutive_failures: 5,
            max_confirmations_per_cycle: 3,
            pattern_history_max: 20,
            default_improvement_priority: 50,
            max_verify_retries: 3,
            max_generation_attempts: 3,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a JSON file, merged onto defaults.
    /// A missing file yields the defaults; a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: AgentConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::Configuration(format!("Invalid config {}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn patterns_path(&self) -> PathBuf {
        self.workspace_dir.join("patterns.json")
    }

    pub fn learning_stats_path(&self) -> PathBuf {
        self.workspace_dir.join("learning-stats.json")
    }

    pub fn troubles_path(&self) -> PathBuf {
        self.workspace_dir.join("troubles.json")
    }

    pub fn trouble_archive_dir(&self) -> PathBuf {
        self.workspace_dir.join("troubles-archive")
    }

    pub fn improvement_queue_path(&self) -> PathBuf {
        self.workspace_dir.join("improvement-queue.json")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.workspace_dir.join("snapshots")
    }

    pub fn ai_review_log_path(&self) -> PathBuf {
        self.workspace_dir.join("ai-review-log.json")
    }

    pub fn goals_path(&self) -> PathBuf {
        self.workspace_dir.join("goals.json")
    }

    pub fn approvals_path(&self) -> PathBuf {
        self.workspace_dir.join("approvals").join("pending.json")
    }

    pub fn errors_path(&self) -> PathBuf {
        self.workspace_dir.join("errors.json")
    }

    pub fn repair_queue_path(&self) -> PathBuf {
        self.workspace_dir.join("repair-queue.json")
    }

    pub fn circuit_breaker_path(&self) -> PathBuf {
        self.workspace_dir.join("circuit-breaker.json")
    }

    pub fn failure_patterns_path(&self) -> PathBuf {
        self.workspace_dir.join("failure-patterns.json")
    }

    pub fn trouble_patterns_path(&self) -> PathBuf {
        self.workspace_dir.join("trouble-patterns.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.check_interval_secs, 300);
        assert_eq!(config.limits.max_files_per_change, 5);
        assert_eq!(config.limits.max_lines_per_file, 500);
        assert_eq!(config.limits.max_snapshots, 10);
        assert_eq!(config.limits.max_active_troubles, 1000);
        assert_eq!(config.limits.max_consecutive_failures, 5);
        assert!(!config.git.auto_push);
    }

    #[test]
    fn test_partial_config_merges_onto_defaults() {
        let partial = r#"{"check_interval_secs": 60, "git": {"auto_push": true}}"#;
        let config: AgentConfig = serde_json::from_str(partial).unwrap();
        assert_eq!(config.check_interval_secs, 60);
        assert!(config.git.auto_push);
        // Untouched fields keep their defaults
        assert_eq!(config.git.push_remote, "origin");
        assert_eq!(config.limits.max_snapshots, 10);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = AgentConfig::load(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(config.check_interval_secs, 300);
    }
}
