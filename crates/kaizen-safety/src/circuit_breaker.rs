//! Circuit breaker for the repair pipeline
//!
//! Tracks consecutive failures globally, per source, and per error id. Any
//! single trigger opens the circuit; after the cooldown the next probe
//! observes half-open and a configured number of successful trials closes
//! it again. State persists between process restarts, with cooldowns kept
//! as wall-clock timestamps so a restart continues an open cooldown.

use chrono::{DateTime, Duration, Utc};
use kaizen_common::store::AtomicStore;
use kaizen_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl Default for BreakerState {
    fn default() -> Self {
        BreakerState::Closed
    }
}

/// Breaker thresholds and timing
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Open after this many attempts on one error id
    pub max_attempts_per_error: u32,
    /// Open after this many consecutive failures from one source
    pub max_consecutive_failures_per_source: u32,
    /// Open after this many consecutive failures overall
    pub max_consecutive_failures_global: u32,
    /// Time in the open state before half-open
    pub cooldown_ms: i64,
    /// Successful half-open trials required to close
    pub half_open_test_count: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_error: 3,
            max_consecutive_failures_per_source: 5,
            max_consecutive_failures_global: 10,
            cooldown_ms: 300_000, // 5 minutes
            half_open_test_count: 2,
        }
    }
}

/// Persisted breaker image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    state: BreakerState,
    last_failure_at: Option<DateTime<Utc>>,
    consecutive_failures_global: u32,
    #[serde(default)]
    consecutive_failures_per_source: HashMap<String, u32>,
    #[serde(default)]
    attempts_per_error: HashMap<String, u32>,
    opened_at: Option<DateTime<Utc>>,
    half_open_tests_remaining: Option<u32>,
}

/// Persistent circuit breaker
pub struct CircuitBreaker {
    config: BreakerConfig,
    store: AtomicStore<PersistedState>,
    state: RwLock<PersistedState>,
}

impl CircuitBreaker {
    /// Open the breaker store, resuming any persisted state
    pub async fn open(config: BreakerConfig, path: impl Into<PathBuf>) -> Self {
        let store = AtomicStore::new(path);
        let state = store.load().await;
        Self {
            config,
            store,
            state: RwLock::new(state),
        }
    }

    /// Whether an attempt may proceed. Handles the open → half-open
    /// transition when the cooldown has elapsed.
    pub async fn allow(&self) -> bool {
        let mut state = self.state.write().await;
        match state.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|at| Utc::now() - at)
                    .unwrap_or_else(Duration::zero);
                if elapsed >= Duration::milliseconds(self.config.cooldown_ms) {
                    info!("Circuit breaker cooling down complete, entering half-open");
                    state.state = BreakerState::HalfOpen;
                    state.half_open_tests_remaining = Some(self.config.half_open_test_count);
                    let _ = self.store.save(&state).await;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful attempt
    pub async fn record_success(&self, source: &str, error_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.consecutive_failures_global = 0;
        state.consecutive_failures_per_source.remove(source);
        state.attempts_per_error.remove(error_id);

        if state.state == BreakerState::HalfOpen {
            let remaining = state
                .half_open_tests_remaining
                .unwrap_or(self.config.half_open_test_count)
                .saturating_sub(1);
            if remaining == 0 {
                info!("Circuit breaker closing after successful trials");
                state.state = BreakerState::Closed;
                state.half_open_tests_remaining = None;
                state.opened_at = None;
            } else {
                state.half_open_tests_remaining = Some(remaining);
            }
        }
        self.store.save(&state).await
    }

    /// Record a failed attempt; may open the circuit
    pub async fn record_failure(&self, source: &str, error_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.last_failure_at = Some(Utc::now());
        state.consecutive_failures_global += 1;
        let per_source = state
            .consecutive_failures_per_source
            .entry(source.to_string())
            .or_insert(0);
        *per_source += 1;
        let per_source = *per_source;
        let per_error = state
            .attempts_per_error
            .entry(error_id.to_string())
            .or_insert(0);
        *per_error += 1;
        let per_error = *per_error;

        let should_open = match state.state {
            // Any failure during a half-open trial reopens immediately
            BreakerState::HalfOpen => true,
            BreakerState::Open => false,
            BreakerState::Closed => {
                per_error >= self.config.max_attempts_per_error
                    || per_source >= self.config.max_consecutive_failures_per_source
                    || state.consecutive_failures_global
                        >= self.config.max_consecutive_failures_global
            }
        };

        if should_open {
            warn!(
                "Circuit breaker opening (source {}, error {}, global {})",
                per_source, per_error, state.consecutive_failures_global
            );
            state.state = BreakerState::Open;
            state.opened_at = Some(Utc::now());
            state.half_open_tests_remaining = None;
        }
        self.store.save(&state).await
    }

    pub async fn state(&self) -> BreakerState {
        self.state.read().await.state
    }

    pub async fn consecutive_failures_global(&self) -> u32 {
        self.state.read().await.consecutive_failures_global
    }

    /// Milliseconds until the open circuit will probe again; zero when not
    /// open.
    pub async fn remaining_cooldown_ms(&self) -> i64 {
        let state = self.state.read().await;
        if state.state != BreakerState::Open {
            return 0;
        }
        let Some(opened_at) = state.opened_at else {
            return 0;
        };
        let elapsed = (Utc::now() - opened_at).num_milliseconds();
        (self.config.cooldown_ms - elapsed).max(0)
    }

    /// Reset to closed and clear all counters
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        info!("Resetting circuit breaker");
        *state = PersistedState::default();
        self.store.save(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cooldown_ms: i64) -> BreakerConfig {
        BreakerConfig {
            max_attempts_per_error: 3,
            max_consecutive_failures_per_source: 4,
            max_consecutive_failures_global: 5,
            cooldown_ms,
            half_open_test_count: 2,
        }
    }

    async fn breaker(dir: &tempfile::TempDir, cooldown_ms: i64) -> CircuitBreaker {
        CircuitBreaker::open(config(cooldown_ms), dir.path().join("circuit-breaker.json")).await
    }

    #[tokio::test]
    async fn test_opens_on_global_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let cb = breaker(&dir, 60_000).await;

        for i in 0..5 {
            assert_eq!(cb.state().await, BreakerState::Closed, "iteration {}", i);
            cb.record_failure(&format!("source-{}", i), &format!("err-{}", i))
                .await
                .unwrap();
        }
        assert_eq!(cb.state().await, BreakerState::Open);
        assert!(!cb.allow().await);
        assert!(cb.remaining_cooldown_ms().await > 0);
    }

    #[tokio::test]
    async fn test_opens_on_per_error_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let cb = breaker(&dir, 60_000).await;

        cb.record_failure("s1", "err-1").await.unwrap();
        cb.record_failure("s2", "err-1").await.unwrap();
        cb.record_failure("s3", "err-1").await.unwrap();
        assert_eq!(cb.state().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn test_half_open_after_cooldown_then_closes() {
        let dir = tempfile::tempdir().unwrap();
        let cb = breaker(&dir, 50).await;

        for _ in 0..3 {
            cb.record_failure("s", "e").await.unwrap();
        }
        assert_eq!(cb.state().await, BreakerState::Open);

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(cb.allow().await);
        assert_eq!(cb.state().await, BreakerState::HalfOpen);

        cb.record_success("s", "e").await.unwrap();
        assert_eq!(cb.state().await, BreakerState::HalfOpen);
        cb.record_success("s", "e2").await.unwrap();
        assert_eq!(cb.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let cb = breaker(&dir, 50).await;

        for _ in 0..3 {
            cb.record_failure("s", "e").await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(cb.allow().await);

        cb.record_failure("s", "e-new").await.unwrap();
        assert_eq!(cb.state().await, BreakerState::Open);
        assert!(!cb.allow().await);
    }

    #[tokio::test]
    async fn test_state_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cb = breaker(&dir, 60_000).await;
            for _ in 0..3 {
                cb.record_failure("s", "e").await.unwrap();
            }
            assert_eq!(cb.state().await, BreakerState::Open);
        }

        let resumed = breaker(&dir, 60_000).await;
        assert_eq!(resumed.state().await, BreakerState::Open);
        assert!(!resumed.allow().await);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cb = breaker(&dir, 60_000).await;
        for _ in 0..3 {
            cb.record_failure("s", "e").await.unwrap();
        }
        cb.reset().await.unwrap();
        assert_eq!(cb.state().await, BreakerState::Closed);
        assert_eq!(cb.consecutive_failures_global().await, 0);
        assert!(cb.allow().await);
    }
}
