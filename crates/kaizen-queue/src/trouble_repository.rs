//! Append-only incident log with rotation to dated archive files
//!
//! The active file holds at most `max_active` troubles; on overflow the
//! oldest entries (by `occurred_at`) move to
//! `troubles-archive/archive-YYYY-MM-DD.json` before the active file is
//! rewritten.

use chrono::Utc;
use kaizen_common::store::{AtomicStore, LazyStore};
use kaizen_common::util::jaccard_similarity;
use kaizen_common::{Result, Trouble};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TroubleFile {
    troubles: Vec<Trouble>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ArchiveFile {
    troubles: Vec<Trouble>,
}

/// Persistent trouble store with bounded active set
pub struct TroubleRepository {
    store: LazyStore<TroubleFile>,
    archive_dir: PathBuf,
    max_active: usize,
}

impl TroubleRepository {
    pub fn new(path: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>, max_active: usize) -> Self {
        Self {
            store: LazyStore::new(path),
            archive_dir: archive_dir.into(),
            max_active,
        }
    }

    /// Append troubles to the active set, rotating the overflow tail into
    /// today's archive file.
    pub async fn append(&self, mut troubles: Vec<Trouble>) -> Result<()> {
        if troubles.is_empty() {
            return Ok(());
        }
        troubles.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));

        let overflow = self
            .store
            .mutate(|file| {
                file.troubles.extend(troubles);
                file.troubles.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
                if file.troubles.len() > self.max_active {
                    let cut = file.troubles.len() - self.max_active;
                    file.troubles.drain(..cut).collect::<Vec<Trouble>>()
                } else {
                    Vec::new()
                }
            })
            .await?;

        if !overflow.is_empty() {
            self.archive(overflow).await?;
        }
        Ok(())
    }

    async fn archive(&self, troubles: Vec<Trouble>) -> Result<()> {
        let date = Utc::now().format("%Y-%m-%d");
        let path = self.archive_dir.join(format!("archive-{}.json", date));
        let store: AtomicStore<ArchiveFile> = AtomicStore::new(&path);

        let mut archive = store.load().await;
        let count = troubles.len();
        archive.troubles.extend(troubles);
        store.save(&archive).await?;

        info!("Archived {} troubles to {}", count, path.display());
        Ok(())
    }

    /// Most recent `n` active troubles, newest last
    pub async fn recent(&self, n: usize) -> Vec<Trouble> {
        let file = self.store.read().await;
        let len = file.troubles.len();
        file.troubles[len.saturating_sub(n)..].to_vec()
    }

    pub async fn active_count(&self) -> usize {
        self.store.read().await.troubles.len()
    }

    /// Unresolved troubles in the active set
    pub async fn unresolved(&self) -> Vec<Trouble> {
        self.store
            .read()
            .await
            .troubles
            .iter()
            .filter(|t| !t.resolved)
            .cloned()
            .collect()
    }

    /// Same category, same file, and message Jaccard similarity above 0.5
    pub async fn find_similar(&self, trouble: &Trouble) -> Vec<Trouble> {
        self.store
            .read()
            .await
            .troubles
            .iter()
            .filter(|t| {
                t.id != trouble.id
                    && t.category == trouble.category
                    && t.file == trouble.file
                    && jaccard_similarity(&t.message, &trouble.message) > 0.5
            })
            .cloned()
            .collect()
    }

    /// Mark a trouble resolved
    pub async fn resolve(&self, id: &str, resolved_by: &str) -> Result<bool> {
        self.store
            .mutate(|file| {
                let Some(t) = file.troubles.iter_mut().find(|t| t.id == id) else {
                    return false;
                };
                t.resolved = true;
                t.resolved_by = Some(resolved_by.to_string());
                t.resolved_at = Some(Utc::now());
                true
            })
            .await
    }
}
