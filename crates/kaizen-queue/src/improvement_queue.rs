//! Priority-ordered persistent queue of proposed work items
//!
//! Items are dequeued in non-increasing priority among `pending` entries and
//! move to `scheduled` in the same write. Enqueues dedup by case-insensitive
//! `(title, description)` against pending items.

use chrono::{Duration, Utc};
use kaizen_common::store::LazyStore;
use kaizen_common::util::generate_id;
use kaizen_common::{
    CycleId, ImprovementKind, QueueStatus, QueuedImprovement, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    items: Vec<QueuedImprovement>,
}

/// A new work item before it enters the queue
#[derive(Debug, Clone)]
pub struct NewImprovement {
    pub source: String,
    pub kind: ImprovementKind,
    pub title: String,
    pub description: String,
    /// Clamped to 0..=100 on enqueue
    pub priority: i64,
    pub related_file: Option<String>,
    pub related_pattern_id: Option<String>,
    pub prevention_suggestion_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewImprovement {
    pub fn new(
        source: impl Into<String>,
        kind: ImprovementKind,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: i64,
    ) -> Self {
        Self {
            source: source.into(),
            kind,
            title: title.into(),
            description: description.into(),
            priority,
            related_file: None,
            related_pattern_id: None,
            prevention_suggestion_id: None,
            metadata: HashMap::new(),
        }
    }
}

/// Persistent improvement queue
pub struct ImprovementQueue {
    store: LazyStore<QueueFile>,
}

impl ImprovementQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: LazyStore::new(path),
        }
    }

    /// Enqueue a new item. Returns `None` when an equivalent pending item
    /// already exists (case-insensitive title + description match).
    pub async fn enqueue(&self, new: NewImprovement) -> Result<Option<String>> {
        let title_key = new.title.to_lowercase();
        let description_key = new.description.to_lowercase();

        self.store
            .mutate(|file| {
                let duplicate = file.items.iter().any(|item| {
                    item.status == QueueStatus::Pending
                        && item.title.to_lowercase() == title_key
                        && item.description.to_lowercase() == description_key
                });
                if duplicate {
                    debug!("Skipping duplicate queued improvement: {}", new.title);
                    return None;
                }

                let now = Utc::now();
                let item = QueuedImprovement {
                    id: generate_id("imp"),
                    source: new.source.clone(),
                    kind: new.kind,
                    title: new.title.clone(),
                    description: new.description.clone(),
                    priority: new.priority.clamp(0, 100) as u8,
                    status: QueueStatus::Pending,
                    metadata: new.metadata.clone(),
                    related_file: new.related_file.clone(),
                    related_pattern_id: new.related_pattern_id.clone(),
                    prevention_suggestion_id: new.prevention_suggestion_id.clone(),
                    created_at: now,
                    updated_at: now,
                    scheduled_for: None,
                    completed_at: None,
                    cycle_id: None,
                    result: None,
                };
                let id = item.id.clone();
                info!("Queued improvement '{}' (priority {})", item.title, item.priority);
                file.items.push(item);
                Some(id)
            })
            .await
    }

    /// Dequeue up to `n` pending items in non-increasing priority order,
    /// marking them `scheduled` in the same write.
    pub async fn dequeue(&self, n: usize) -> Result<Vec<QueuedImprovement>> {
        self.store
            .mutate(|file| {
                let mut pending_ids: Vec<(u8, chrono::DateTime<Utc>, String)> = file
                    .items
                    .iter()
                    .filter(|item| item.status == QueueStatus::Pending)
                    .map(|item| (item.priority, item.created_at, item.id.clone()))
                    .collect();
                // Highest priority first; FIFO within a priority
                pending_ids.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
                pending_ids.truncate(n);

                let selected: Vec<String> = pending_ids.into_iter().map(|(_, _, id)| id).collect();
                let now = Utc::now();
                let mut dequeued = Vec::new();
                for item in file.items.iter_mut() {
                    if selected.contains(&item.id) {
                        item.status = QueueStatus::Scheduled;
                        item.scheduled_for = Some(now);
                        item.updated_at = now;
                        dequeued.push(item.clone());
                    }
                }
                dequeued.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
                dequeued
            })
            .await
    }

    /// Peek at the top pending items without changing their status
    pub async fn top_pending(&self, n: usize) -> Vec<QueuedImprovement> {
        let file = self.store.read().await;
        let mut pending: Vec<QueuedImprovement> = file
            .items
            .iter()
            .filter(|item| item.status == QueueStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        pending.truncate(n);
        pending
    }

    pub async fn pending_count(&self) -> usize {
        self.store
            .read()
            .await
            .items
            .iter()
            .filter(|item| item.status == QueueStatus::Pending)
            .count()
    }

    pub async fn get(&self, id: &str) -> Option<QueuedImprovement> {
        self.store
            .read()
            .await
            .items
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    /// Advance an item through the status machine
    pub async fn update_status(
        &self,
        id: &str,
        status: QueueStatus,
        cycle_id: Option<CycleId>,
        result: Option<String>,
    ) -> Result<bool> {
        self.store
            .mutate(|file| {
                let Some(item) = file.items.iter_mut().find(|item| item.id == id) else {
                    return false;
                };
                let now = Utc::now();
                item.status = status;
                item.updated_at = now;
                if status.is_terminal() {
                    item.completed_at = Some(now);
                }
                if cycle_id.is_some() {
                    item.cycle_id = cycle_id;
                }
                if result.is_some() {
                    item.result = result;
                }
                true
            })
            .await
    }

    /// Drop terminal items whose completion is older than `days_old` days.
    /// Non-terminal items are always retained. Returns the removed count.
    pub async fn cleanup(&self, days_old: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days_old);
        self.store
            .mutate(|file| {
                let before = file.items.len();
                file.items.retain(|item| {
                    if !item.status.is_terminal() {
                        return true;
                    }
                    match item.completed_at {
                        Some(completed) => completed >= cutoff,
                        None => item.updated_at >= cutoff,
                    }
                });
                let removed = before - file.items.len();
                if removed > 0 {
                    info!("Cleaned up {} old queue items", removed);
                }
                removed
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_in(dir: &tempfile::TempDir) -> ImprovementQueue {
        ImprovementQueue::new(dir.path().join("improvement-queue.json"))
    }

    fn item(title: &str, priority: i64) -> NewImprovement {
        NewImprovement::new(
            "test",
            ImprovementKind::Refactor,
            title,
            format!("{} description", title),
            priority,
        )
    }

    #[tokio::test]
    async fn test_dequeue_in_priority_order_marks_scheduled() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);

        queue.enqueue(item("low", 10)).await.unwrap();
        queue.enqueue(item("high", 90)).await.unwrap();
        queue.enqueue(item("mid", 50)).await.unwrap();

        let dequeued = queue.dequeue(2).await.unwrap();
        assert_eq!(dequeued.len(), 2);
        assert_eq!(dequeued[0].title, "high");
        assert_eq!(dequeued[1].title, "mid");
        assert!(dequeued.iter().all(|i| i.status == QueueStatus::Scheduled));

        // The low item stays pending
        assert_eq!(queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_dedups_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);

        let first = queue.enqueue(item("Remove unused import", 75)).await.unwrap();
        assert!(first.is_some());

        let mut dup = item("remove unused IMPORT", 75);
        dup.description = "Remove unused import description".to_string();
        let second = queue.enqueue(dup).await.unwrap();
        assert!(second.is_none());
        assert_eq!(queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_priority_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);

        let id = queue.enqueue(item("boosted", 250)).await.unwrap().unwrap();
        let stored = queue.get(&id).await.unwrap();
        assert_eq!(stored.priority, 100);

        let id = queue.enqueue(item("negative", -5)).await.unwrap().unwrap();
        assert_eq!(queue.get(&id).await.unwrap().priority, 0);
    }

    #[tokio::test]
    async fn test_status_machine_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);

        let id = queue.enqueue(item("work", 60)).await.unwrap().unwrap();
        queue
            .update_status(&id, QueueStatus::InProgress, Some("cycle_1".into()), None)
            .await
            .unwrap();
        queue
            .update_status(&id, QueueStatus::Completed, None, Some("done".into()))
            .await
            .unwrap();

        let stored = queue.get(&id).await.unwrap();
        assert_eq!(stored.status, QueueStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.cycle_id.as_deref(), Some("cycle_1"));

        // A fresh terminal item survives cleanup; the window is in days
        assert_eq!(queue.cleanup(7).await.unwrap(), 0);
        assert!(queue.get(&id).await.is_some());

        // With a zero-day window it is collected
        assert_eq!(queue.cleanup(0).await.unwrap(), 1);
        assert!(queue.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_retains_pending() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        queue.enqueue(item("keep me", 40)).await.unwrap();
        assert_eq!(queue.cleanup(0).await.unwrap(), 0);
        assert_eq!(queue.pending_count().await, 1);
    }
}
