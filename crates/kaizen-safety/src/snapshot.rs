//! Workspace snapshots for rollback
//!
//! A snapshot copies every tracked file (source and manifests) from the
//! project into `snapshots/<id>/`, preserving relative paths, along with a
//! `meta.json` describing it. Retention is LRU by timestamp. Restore
//! rewrites each tracked file from the snapshot copy, atomically per file.

use chrono::{DateTime, Utc};
use kaizen_common::util::generate_id;
use kaizen_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File extensions captured in a snapshot
const TRACKED_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "json", "toml", "md", "yml", "yaml",
];
/// Directory names never descended into
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "dist",
    "snapshots",
    "workspace",
];

/// Snapshot metadata, persisted as `meta.json` inside the snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub file_count: usize,
    pub description: Option<String>,
}

/// Owns the snapshot directory and retention policy
pub struct SnapshotManager {
    project_dir: PathBuf,
    snapshots_dir: PathBuf,
    max_snapshots: usize,
}

impl SnapshotManager {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        snapshots_dir: impl Into<PathBuf>,
        max_snapshots: usize,
    ) -> Self {
        Self {
            project_dir: project_dir.into(),
            snapshots_dir: snapshots_dir.into(),
            max_snapshots,
        }
    }

    fn tracked_files(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.project_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .map(|ext| TRACKED_EXTENSIONS.contains(&ext.to_string_lossy().as_ref()))
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Create a snapshot of all tracked files. Returns the snapshot id.
    pub async fn create(&self, description: Option<&str>) -> Result<String> {
        let id = generate_id("snap");
        let snapshot_dir = self.snapshots_dir.join(&id);
        tokio::fs::create_dir_all(&snapshot_dir).await?;

        let files = self.tracked_files();
        let mut copied = 0usize;
        for file in &files {
            let relative = file
                .strip_prefix(&self.project_dir)
                .map_err(|_| Error::Internal(format!("File {} outside project", file.display())))?;
            let target = snapshot_dir.join(relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            match tokio::fs::copy(file, &target).await {
                Ok(_) => copied += 1,
                Err(e) => warn!("Failed to snapshot {}: {}", file.display(), e),
            }
        }

        let meta = SnapshotMeta {
            id: id.clone(),
            timestamp: Utc::now(),
            file_count: copied,
            description: description.map(|d| d.to_string()),
        };
        let meta_json = serde_json::to_string_pretty(&meta)?;
        tokio::fs::write(snapshot_dir.join("meta.json"), meta_json).await?;

        info!("Created snapshot {} with {} files", id, copied);
        self.prune().await?;
        Ok(id)
    }

    /// Restore the workspace from a snapshot. Each file is written via a
    /// temp file and rename. Returns false when the snapshot is unknown.
    pub async fn restore(&self, id: &str) -> Result<bool> {
        let snapshot_dir = self.snapshots_dir.join(id);
        if !snapshot_dir.is_dir() {
            warn!("Snapshot {} not found", id);
            return Ok(false);
        }

        let mut restored = 0usize;
        for entry in WalkDir::new(&snapshot_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = entry
                .path()
                .strip_prefix(&snapshot_dir)
                .map_err(|_| Error::Internal("Snapshot entry outside snapshot".into()))?;
            if relative == Path::new("meta.json") {
                continue;
            }
            let target = self.project_dir.join(relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = tokio::fs::read(entry.path()).await?;
            let tmp = target.with_extension("restore.tmp");
            tokio::fs::write(&tmp, &content).await?;
            tokio::fs::rename(&tmp, &target).await?;
            restored += 1;
        }

        info!("Restored {} files from snapshot {}", restored, id);
        Ok(true)
    }

    /// Restore a single file from a snapshot, if it was captured
    pub async fn restore_file(&self, id: &str, relative: &Path) -> Result<bool> {
        let source = self.snapshots_dir.join(id).join(relative);
        if !source.is_file() {
            return Ok(false);
        }
        let target = self.project_dir.join(relative);
        let content = tokio::fs::read(&source).await?;
        let tmp = target.with_extension("restore.tmp");
        tokio::fs::write(&tmp, &content).await?;
        tokio::fs::rename(&tmp, &target).await?;
        debug!("Restored {} from snapshot {}", relative.display(), id);
        Ok(true)
    }

    /// List snapshot metadata, oldest first
    pub async fn list(&self) -> Vec<SnapshotMeta> {
        let mut metas = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.snapshots_dir).await else {
            return metas;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let meta_path = entry.path().join("meta.json");
            if let Ok(raw) = tokio::fs::read_to_string(&meta_path).await {
                match serde_json::from_str::<SnapshotMeta>(&raw) {
                    Ok(meta) => metas.push(meta),
                    Err(e) => warn!("Unreadable snapshot meta {}: {}", meta_path.display(), e),
                }
            }
        }
        metas.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        metas
    }

    /// Drop the oldest snapshots beyond the retention bound
    async fn prune(&self) -> Result<()> {
        let metas = self.list().await;
        if metas.len() <= self.max_snapshots {
            return Ok(());
        }
        let excess = metas.len() - self.max_snapshots;
        for meta in metas.into_iter().take(excess) {
            let dir = self.snapshots_dir.join(&meta.id);
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!("Failed to prune snapshot {}: {}", meta.id, e);
            } else {
                debug!("Pruned snapshot {}", meta.id);
            }
        }
        Ok(())
    }
}
