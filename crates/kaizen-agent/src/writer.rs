//! Guarded file writes for generated artifacts
//!
//! Every write of AI-produced content goes through here: path validation,
//! protected-tier checks, the dangerous-content scan, AI security review
//! when required, and finally an atomic write. The caller learns whether
//! the file existed before so it can record the right change type.

use crate::app::App;
use kaizen_common::{ChangeType, Error, Result};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Outcome of a guarded write
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// Path actually written, relative to the project root
    pub path: String,
    pub change_type: ChangeType,
    /// Content that was replaced, for template extraction and backups
    pub previous_content: Option<String>,
}

/// Validate and write one generated artifact into the project.
///
/// `description` is shown to the AI reviewer when a review is required.
pub async fn safe_write(
    app: &App,
    requested_path: &str,
    content: &str,
    description: &str,
) -> Result<WriteOutcome> {
    let validation = app.guard.validate_path(requested_path);
    if !validation.valid {
        return Err(Error::Policy(format!(
            "Invalid path '{}': {:?}",
            requested_path,
            validation.error
        )));
    }
    let path = validation
        .corrected_path
        .unwrap_or_else(|| app.guard.normalize_path(requested_path));

    if app.guard.is_strictly_protected(&path) {
        return Err(Error::Policy(format!("File '{}' is protected", path)));
    }

    app.guard
        .validate_change(std::slice::from_ref(&path), content.lines().count())
        .map_err(Error::Policy)?;

    if app.guard.is_conditionally_protected(&path) {
        let decision = app
            .reviewer
            .review_protected_change(&path, description, Some(content))
            .await?;
        if !decision.approved {
            return Err(Error::Policy(format!(
                "Protected change to '{}' rejected: {}",
                path, decision.reason
            )));
        }
    }

    let report = app.guard.validate_code_content(content);
    if !report.safe {
        warn!(
            "Generated content for '{}' flagged: {}",
            path,
            report.warnings.join(", ")
        );
        let decision = app
            .reviewer
            .review_code(content, description, &report.warnings)
            .await?;
        if !decision.approved {
            return Err(Error::Policy(format!(
                "Security review rejected write to '{}': {}",
                path, decision.reason
            )));
        }
    }

    let absolute: PathBuf = app.config.project_dir.join(&path);
    let previous_content = tokio::fs::read_to_string(&absolute).await.ok();
    let change_type = if previous_content.is_some() {
        ChangeType::Modify
    } else {
        ChangeType::Create
    };

    if let Some(parent) = absolute.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = absolute.with_extension("write.tmp");
    tokio::fs::write(&tmp, content.as_bytes()).await?;
    tokio::fs::rename(&tmp, &absolute).await?;
    debug!("Wrote {} ({:?})", path, change_type);

    Ok(WriteOutcome {
        path,
        change_type,
        previous_content,
    })
}
