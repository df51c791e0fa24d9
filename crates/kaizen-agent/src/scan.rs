//! Bounded source-tree scanning shared by the discovery phases

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions the discovery phases consider source code
pub const SOURCE_EXTENSIONS: &[&str] = &["rs", "ts", "tsx", "js", "jsx"];
/// Directory names never descended into
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "dist",
    "snapshots",
    "workspace",
    "tests",
];
/// Upper bound on scanned files per cycle
pub const MAX_SCANNED_FILES: usize = 200;
/// Upper bound on bytes read per file
const MAX_FILE_BYTES: u64 = 128 * 1024;

/// A source file with its content loaded
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the project root
    pub relative: PathBuf,
    pub content: String,
}

/// List source files under the project root, relative paths, bounded count
pub fn list_source_files(project_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(project_dir)
        .follow_links(false)
        .sort_by_file_name()
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
                .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_string_lossy().as_ref()))
                .unwrap_or(false)
        })
        .take(MAX_SCANNED_FILES)
        .filter_map(|entry| {
            entry
                .into_path()
                .strip_prefix(project_dir)
                .ok()
                .map(|p| p.to_path_buf())
        })
        .collect()
}

/// Load source files with their content, skipping oversized ones
pub async fn load_source_files(project_dir: &Path) -> Vec<SourceFile> {
    let mut files = Vec::new();
    for relative in list_source_files(project_dir) {
        let absolute = project_dir.join(&relative);
        let too_large = tokio::fs::metadata(&absolute)
            .await
            .map(|m| m.len() > MAX_FILE_BYTES)
            .unwrap_or(true);
        if too_large {
            continue;
        }
        if let Ok(content) = tokio::fs::read_to_string(&absolute).await {
            files.push(SourceFile { relative, content });
        }
    }
    files
}

/// Whether a path looks like a test file
pub fn is_test_file(path: &Path) -> bool {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with("_test")
        || name.ends_with(".test")
        || name.ends_with(".spec")
        || name.starts_with("test_")
        || path.components().any(|c| c.as_os_str() == "tests")
}
