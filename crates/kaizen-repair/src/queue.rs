//! Repair task scheduling
//!
//! Tasks are scheduled by priority; at most one task is `in_progress` at
//! any time, guaranteed by the dequeue semantics: `next()` returns nothing
//! while another task is running.

use chrono::{DateTime, Utc};
use kaizen_common::store::LazyStore;
use kaizen_common::util::generate_id;
use kaizen_common::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Repair urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Lifecycle of a repair task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairTaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// One scheduled repair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairTask {
    pub id: String,
    pub error_id: String,
    pub priority: RepairPriority,
    pub prompt: String,
    pub max_attempts: u32,
    pub current_attempt: u32,
    pub status: RepairTaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RepairFile {
    tasks: Vec<RepairTask>,
}

/// Persistent repair queue
pub struct RepairQueue {
    store: LazyStore<RepairFile>,
}

impl RepairQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: LazyStore::new(path),
        }
    }

    /// Schedule a repair for an error. Returns the task id, or `None` when
    /// a live task for the error already exists.
    pub async fn schedule(
        &self,
        error_id: &str,
        priority: RepairPriority,
        prompt: String,
        max_attempts: u32,
    ) -> Result<Option<String>> {
        let error_id = error_id.to_string();
        self.store
            .mutate(|file| {
                let live = file.tasks.iter().any(|t| {
                    t.error_id == error_id
                        && matches!(
                            t.status,
                            RepairTaskStatus::Pending | RepairTaskStatus::InProgress
                        )
                });
                if live {
                    debug!("Repair already scheduled for error {}", error_id);
                    return None;
                }
                let task = RepairTask {
                    id: generate_id("rep"),
                    error_id,
                    priority,
                    prompt,
                    max_attempts,
                    current_attempt: 0,
                    status: RepairTaskStatus::Pending,
                    created_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                    result: None,
                };
                let id = task.id.clone();
                info!("Scheduled repair task {} ({:?})", id, task.priority);
                file.tasks.push(task);
                Some(id)
            })
            .await
    }

    /// Pop the highest-priority pending task and mark it in progress.
    /// Returns nothing while another task is already running.
    pub async fn next(&self) -> Result<Option<RepairTask>> {
        self.store
            .mutate(|file| {
                let busy = file
                    .tasks
                    .iter()
                    .any(|t| t.status == RepairTaskStatus::InProgress);
                if busy {
                    return None;
                }
                let best = file
                    .tasks
                    .iter_mut()
                    .filter(|t| t.status == RepairTaskStatus::Pending)
                    .max_by(|a, b| {
                        a.priority
                            .cmp(&b.priority)
                            .then(b.created_at.cmp(&a.created_at))
                    })?;
                best.status = RepairTaskStatus::InProgress;
                best.started_at = Some(Utc::now());
                best.current_attempt += 1;
                Some(best.clone())
            })
            .await
    }

    /// Finish the running task. A failure below the attempt cap re-queues
    /// it as pending; at the cap it becomes failed.
    pub async fn complete(
        &self,
        task_id: &str,
        success: bool,
        result: Option<String>,
    ) -> Result<bool> {
        self.store
            .mutate(|file| {
                let Some(task) = file.tasks.iter_mut().find(|t| t.id == task_id) else {
                    return false;
                };
                if success {
                    task.status = RepairTaskStatus::Completed;
                    task.completed_at = Some(Utc::now());
                } else if task.current_attempt >= task.max_attempts {
                    task.status = RepairTaskStatus::Failed;
                    task.completed_at = Some(Utc::now());
                } else {
                    task.status = RepairTaskStatus::Pending;
                }
                task.result = result;
                true
            })
            .await
    }

    pub async fn cancel(&self, task_id: &str) -> Result<bool> {
        self.store
            .mutate(|file| {
                let Some(task) = file.tasks.iter_mut().find(|t| t.id == task_id) else {
                    return false;
                };
                if matches!(
                    task.status,
                    RepairTaskStatus::Pending | RepairTaskStatus::InProgress
                ) {
                    task.status = RepairTaskStatus::Cancelled;
                    task.completed_at = Some(Utc::now());
                    true
                } else {
                    false
                }
            })
            .await
    }

    pub async fn get(&self, task_id: &str) -> Option<RepairTask> {
        self.store
            .read()
            .await
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.store
            .read()
            .await
            .tasks
            .iter()
            .filter(|t| t.status == RepairTaskStatus::Pending)
            .count()
    }
}
