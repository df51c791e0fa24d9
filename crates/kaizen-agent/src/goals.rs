//! Persistent goal store
//!
//! Goals are longer-term objectives the agent advances across cycles. They
//! are loaded into the cycle context at start and progress is written back
//! at finalization.

use chrono::Utc;
use kaizen_common::store::LazyStore;
use kaizen_common::util::generate_id;
use kaizen_common::{Goal, GoalStatus, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Default, Serialize, Deserialize)]
struct GoalFile {
    goals: Vec<Goal>,
}

/// Persistent goal store
pub struct GoalStore {
    store: LazyStore<GoalFile>,
}

impl GoalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: LazyStore::new(path),
        }
    }

    pub async fn active(&self) -> Vec<Goal> {
        self.store
            .read()
            .await
            .goals
            .iter()
            .filter(|g| g.status == GoalStatus::Active)
            .cloned()
            .collect()
    }

    pub async fn add(&self, title: &str, description: &str) -> Result<String> {
        let goal = Goal {
            id: generate_id("goal"),
            title: title.to_string(),
            description: description.to_string(),
            status: GoalStatus::Active,
            progress: 0.0,
            updated_at: Utc::now(),
        };
        let id = goal.id.clone();
        self.store.mutate(|file| file.goals.push(goal)).await?;
        Ok(id)
    }

    /// Write back progress for the given goals; goals reaching 1.0 are
    /// marked done.
    pub async fn save_progress(&self, progress: &HashMap<String, f32>) -> Result<()> {
        if progress.is_empty() {
            return Ok(());
        }
        self.store
            .mutate(|file| {
                for goal in file.goals.iter_mut() {
                    if let Some(p) = progress.get(&goal.id) {
                        goal.progress = p.clamp(0.0, 1.0);
                        goal.updated_at = Utc::now();
                        if goal.progress >= 1.0 {
                            goal.status = GoalStatus::Done;
                        }
                    }
                }
            })
            .await
    }
}
