//! Confirmation queue for fallback-produced changes
//!
//! When the primary provider is rate limited and a fallback provider wrote
//! code, the change is recorded here. A later cycle re-reviews pending
//! entries with the primary provider before anything else runs; primary
//! unavailability just leaves them pending.

use chrono::{DateTime, Utc};
use kaizen_common::store::LazyStore;
use kaizen_common::util::generate_id;
use kaizen_common::{CycleId, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    NeedsReview,
}

/// One fallback-produced change awaiting a high-trust review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub id: String,
    pub cycle_id: CycleId,
    pub file: String,
    pub description: String,
    /// Name of the fallback provider that produced the change
    pub provider: String,
    pub status: ConfirmationStatus,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_note: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfirmationFile {
    items: Vec<PendingConfirmation>,
}

/// Persistent confirmation queue
pub struct ConfirmationStore {
    store: LazyStore<ConfirmationFile>,
}

impl ConfirmationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: LazyStore::new(path),
        }
    }

    pub async fn record(
        &self,
        cycle_id: &str,
        file: &str,
        description: &str,
        provider: &str,
    ) -> Result<String> {
        let item = PendingConfirmation {
            id: generate_id("cnf"),
            cycle_id: cycle_id.to_string(),
            file: file.to_string(),
            description: description.to_string(),
            provider: provider.to_string(),
            status: ConfirmationStatus::Pending,
            created_at: Utc::now(),
            reviewed_at: None,
            review_note: None,
        };
        let id = item.id.clone();
        self.store.mutate(|file| file.items.push(item)).await?;
        Ok(id)
    }

    /// Oldest pending entries first
    pub async fn pending(&self, limit: usize) -> Vec<PendingConfirmation> {
        let file = self.store.read().await;
        file.items
            .iter()
            .filter(|item| item.status == ConfirmationStatus::Pending)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.store
            .read()
            .await
            .items
            .iter()
            .filter(|item| item.status == ConfirmationStatus::Pending)
            .count()
    }

    pub async fn mark(
        &self,
        id: &str,
        status: ConfirmationStatus,
        note: Option<String>,
    ) -> Result<bool> {
        self.store
            .mutate(|file| {
                let Some(item) = file.items.iter_mut().find(|item| item.id == id) else {
                    return false;
                };
                item.status = status;
                item.reviewed_at = Some(Utc::now());
                item.review_note = note;
                true
            })
            .await
    }
}
