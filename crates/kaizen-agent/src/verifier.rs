//! Build/test verification with bounded self-repair
//!
//! The verifier confirms a cycle's changes are safe to keep. Build errors
//! go through classification: mechanical fixes (duplicated path prefixes)
//! are applied directly, everything else goes to AI repair on the offending
//! file. A progress guard aborts the loop after two consecutive attempts
//! without improvement. Failure at any stage restores the snapshot taken
//! at cycle start. Success ends in a commit and, when configured, a push
//! that refuses protected branches.

use crate::app::App;
use crate::context::CycleContext;
use crate::writer::safe_write;
use kaizen_common::util::short_id;
use kaizen_common::{AgentEvent, Result, TestResult};
use kaizen_provider::sanitize::{extract_code_block, scrub_control_sequences, validate_artifact};
use kaizen_provider::{run_argv, CompletionRequest, SubprocessLimits, SubprocessOutput};
use kaizen_queue::{parse_build_errors, parse_test_output, BuildErrorLine};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Branches never pushed to without explicit permission
const PROTECTED_BRANCHES: &[&str] = &["main", "master"];
/// Push attempts are bounded tighter than builds
const PUSH_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one verification run
#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    pub build_passed: bool,
    pub tests_passed: bool,
    pub build_errors: Vec<BuildErrorLine>,
    pub test_result: Option<TestResult>,
    pub auto_fix_attempted: bool,
    pub fixes_applied: u32,
    pub committed: bool,
    pub commit_hash: Option<String>,
    pub pushed: bool,
    pub push_output: Option<String>,
    pub rolled_back: bool,
    pub rollback_reason: Option<String>,
    pub gitignore_updated: bool,
}

/// How a classified error should be fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixStrategy {
    Mechanical,
    AiRepair,
}

/// Coarse build-error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildErrorKind {
    DuplicatePath,
    ModuleNotFound,
    SyntaxError,
    TypeError,
    Unknown,
}

/// Tracks fix progress across repair attempts; two consecutive attempts
/// without improvement abort the loop.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    previous_remaining: Option<usize>,
    stalled_streak: u32,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt's remaining error count and applied fixes
    pub fn record(&mut self, remaining: usize, fixes_applied: u32) {
        let improved = fixes_applied > 0
            || self
                .previous_remaining
                .map(|prev| remaining < prev)
                .unwrap_or(false);
        if improved {
            self.stalled_streak = 0;
        } else {
            self.stalled_streak += 1;
        }
        self.previous_remaining = Some(remaining);
    }

    pub fn stalled(&self) -> bool {
        self.stalled_streak >= 2
    }
}

/// The verification engine
pub struct Verifier<'a> {
    app: &'a App,
}

impl<'a> Verifier<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }

    /// Verify the cycle's changes with bounded auto-repair
    pub async fn verify_with_retry(
        &self,
        ctx: &mut CycleContext,
        max_retries: u32,
    ) -> Result<VerificationResult> {
        let mut result = VerificationResult::default();

        // Build + auto-fix loop
        let mut tracker = ProgressTracker::new();
        for attempt in 0..=max_retries {
            let build = self.run_build().await?;
            if build.as_ref().map(|b| b.success()).unwrap_or(true) {
                result.build_passed = true;
                result.build_errors.clear();
                break;
            }
            let output = build.expect("failed build has output").combined();
            let errors = parse_build_errors(&output);
            self.app.collector.capture_build_output("verify", &output).await;
            result.build_errors = errors.clone();

            if attempt == max_retries {
                debug!("Auto-fix retries exhausted");
                break;
            }
            if errors.is_empty() {
                // A failing build with nothing parseable is not fixable here
                warn!("Build failed without parseable errors");
                break;
            }

            result.auto_fix_attempted = true;
            let mut fixed = 0u32;
            for error in &errors {
                if self.try_fix(ctx, error).await {
                    fixed += 1;
                }
            }
            result.fixes_applied += fixed;
            tracker.record(errors.len(), fixed);
            if tracker.stalled() {
                warn!("No repair progress on two consecutive attempts, aborting");
                break;
            }
        }

        if !result.build_passed {
            self.rollback(ctx, &mut result, "build errors could not be repaired")
                .await;
            return Ok(result);
        }

        // Post-build integrity: circular dependency detection
        if !self.app.config.build.circular_check_command.is_empty() {
            let check = run_argv(
                &self.app.config.build.circular_check_command,
                &self.app.config.project_dir,
                &self.app.subprocess_limits(),
            )
            .await?;
            if !check.success() || !check.stdout.trim().is_empty() {
                self.app
                    .collector
                    .capture_build_output("verify", &check.combined())
                    .await;
                self.rollback(ctx, &mut result, "circular dependencies detected")
                    .await;
                return Ok(result);
            }
        }

        // Tests
        let test_result = self.run_tests().await?;
        result.tests_passed = test_result.as_ref().map(|t| t.passed).unwrap_or(true);
        if let Some(tests) = test_result {
            ctx.test_results = Some(tests.clone());
            result.test_result = Some(tests);
        }
        if !result.tests_passed {
            if let Some(tests) = &result.test_result {
                for error in &tests.errors {
                    self.app
                        .collector
                        .capture_test_output("verify", error)
                        .await;
                }
            }
            self.rollback(ctx, &mut result, "tests failed").await;
            return Ok(result);
        }

        // Commit, then optionally push
        self.commit(ctx, &mut result).await;
        if result.committed && self.app.config.git.auto_push {
            self.push(&mut result).await;
        }

        Ok(result)
    }

    async fn run_build(&self) -> Result<Option<SubprocessOutput>> {
        if self.app.config.build.build_command.is_empty() {
            return Ok(None);
        }
        let output = run_argv(
            &self.app.config.build.build_command,
            &self.app.config.project_dir,
            &self.app.subprocess_limits(),
        )
        .await?;
        Ok(Some(output))
    }

    async fn run_tests(&self) -> Result<Option<TestResult>> {
        if self.app.config.build.test_command.is_empty() {
            return Ok(None);
        }
        let started = std::time::Instant::now();
        let output = run_argv(
            &self.app.config.build.test_command,
            &self.app.config.project_dir,
            &self.app.subprocess_limits(),
        )
        .await?;
        Ok(Some(parse_test_output(
            &output.combined(),
            output.success(),
            started.elapsed().as_millis() as u64,
        )))
    }

    /// Attempt one fix; mechanical strategies first
    async fn try_fix(&self, ctx: &mut CycleContext, error: &BuildErrorLine) -> bool {
        let (kind, strategy) = classify(error);
        debug!(
            "Fixing {} ({:?} via {:?})",
            error.file, kind, strategy
        );
        match strategy {
            FixStrategy::Mechanical => self.fix_mechanical(error).await,
            FixStrategy::AiRepair => self.fix_with_ai(ctx, error).await,
        }
    }

    /// Duplicated path prefixes are repaired by moving the file to its
    /// normalized location.
    async fn fix_mechanical(&self, error: &BuildErrorLine) -> bool {
        let normalized = self.app.guard.normalize_path(&error.file);
        if normalized == error.file {
            return false;
        }
        let from = self.app.config.project_dir.join(&error.file);
        let to = self.app.config.project_dir.join(&normalized);
        if !from.exists() || to.exists() {
            return false;
        }
        if let Some(parent) = to.parent() {
            if tokio::fs::create_dir_all(parent).await.is_err() {
                return false;
            }
        }
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => {
                info!("Moved {} -> {}", error.file, normalized);
                true
            }
            Err(e) => {
                warn!("Mechanical fix failed for {}: {}", error.file, e);
                false
            }
        }
    }

    /// Whole-file AI repair with the same guard pipeline as implementation
    async fn fix_with_ai(&self, ctx: &mut CycleContext, error: &BuildErrorLine) -> bool {
        if self.app.guard.is_strictly_protected(&error.file) {
            warn!("Refusing AI repair of protected file {}", error.file);
            return false;
        }

        let absolute = self.app.config.project_dir.join(&error.file);
        let Ok(current) = tokio::fs::read_to_string(&absolute).await else {
            return false;
        };
        let extension = Path::new(&error.file)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        let prompt = format!(
            "The project build failed with this error:\n{}\n\n\
             Fix the file below and output its complete corrected content, nothing else.\n\
             File: {}\n```\n{}\n```",
            error.raw, error.file, current
        );

        ctx.ai_calls += 1;
        let completion = match self
            .app
            .providers
            .complete(&CompletionRequest::new(prompt))
            .await
        {
            Ok((completion, _)) => completion,
            Err(e) => {
                warn!("AI repair call failed for {}: {}", error.file, e);
                return false;
            }
        };
        ctx.token_usage.add(completion.usage);

        let artifact = extract_code_block(&scrub_control_sequences(&completion.text));
        if !validate_artifact(&extension, &artifact).valid {
            warn!("AI repair for {} produced an invalid artifact", error.file);
            return false;
        }

        match safe_write(
            self.app,
            &error.file,
            &artifact,
            &format!("repair build error: {}", error.message),
        )
        .await
        {
            Ok(_) => {
                info!("AI-repaired {}", error.file);
                true
            }
            Err(e) => {
                warn!("Guarded write rejected repair of {}: {}", error.file, e);
                false
            }
        }
    }

    async fn rollback(
        &self,
        ctx: &mut CycleContext,
        result: &mut VerificationResult,
        reason: &str,
    ) {
        result.rollback_reason = Some(reason.to_string());
        let Some(snapshot_id) = ctx.snapshot_id.clone() else {
            warn!("No snapshot to roll back to ({})", reason);
            return;
        };
        match self.app.snapshots.restore(&snapshot_id).await {
            Ok(true) => {
                result.rolled_back = true;
                self.app.events.emit(AgentEvent::Rollback {
                    cycle_id: ctx.cycle_id.clone(),
                    reason: reason.to_string(),
                });
                info!("Rolled back to snapshot {} ({})", snapshot_id, reason);
            }
            Ok(false) => warn!("Snapshot {} missing, rollback skipped", snapshot_id),
            Err(e) => warn!("Rollback failed: {}", e),
        }
    }

    async fn git(&self, args: &[&str], limits: &SubprocessLimits) -> Result<SubprocessOutput> {
        let mut argv = vec!["git".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        run_argv(&argv, &self.app.config.project_dir, limits).await
    }

    async fn commit(&self, ctx: &CycleContext, result: &mut VerificationResult) {
        let limits = self.app.subprocess_limits();

        if self.app.config.git.auto_update_gitignore {
            result.gitignore_updated = self.update_gitignore().await;
        }

        let message = format!(
            "chore: automated improvement cycle {}",
            short_id(&ctx.cycle_id)
        );
        let staged = self.git(&["add", "-A"], &limits).await;
        if staged.as_ref().map(|o| !o.success()).unwrap_or(true) {
            warn!("git add failed; skipping commit");
            return;
        }
        match self.git(&["commit", "-m", message.as_str()], &limits).await {
            Ok(output) if output.success() => {
                result.committed = true;
                if let Ok(hash) = self.git(&["rev-parse", "--short", "HEAD"], &limits).await {
                    if hash.success() {
                        result.commit_hash = Some(hash.stdout.trim().to_string());
                    }
                }
                info!("Committed cycle changes ({:?})", result.commit_hash);
            }
            Ok(output) => {
                if output.combined().contains("nothing to commit") {
                    debug!("Nothing to commit");
                } else {
                    warn!("git commit failed: {}", output.combined());
                }
            }
            Err(e) => warn!("git commit could not run: {}", e),
        }
    }

    /// Append well-known artifact directories that exist on disk and are
    /// not yet ignored.
    async fn update_gitignore(&self) -> bool {
        let candidates = ["target/", "node_modules/", "dist/", "snapshots/"];
        let path = self.app.config.project_dir.join(".gitignore");
        let existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        let mut additions = Vec::new();
        for candidate in candidates {
            let dir = self.app.config.project_dir.join(candidate.trim_end_matches('/'));
            if dir.is_dir() && !existing.lines().any(|l| l.trim() == candidate.trim_end_matches('/') || l.trim() == candidate) {
                additions.push(candidate);
            }
        }
        if additions.is_empty() {
            return false;
        }
        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        for addition in &additions {
            updated.push_str(addition);
            updated.push('\n');
        }
        match tokio::fs::write(&path, updated).await {
            Ok(()) => {
                info!("Updated .gitignore with {:?}", additions);
                true
            }
            Err(e) => {
                warn!("Failed to update .gitignore: {}", e);
                false
            }
        }
    }

    async fn push(&self, result: &mut VerificationResult) {
        let limits = SubprocessLimits {
            idle_timeout: PUSH_TIMEOUT,
            max_total: PUSH_TIMEOUT,
            ..SubprocessLimits::default()
        };

        let branch = match self.git(&["rev-parse", "--abbrev-ref", "HEAD"], &limits).await {
            Ok(output) if output.success() => output.stdout.trim().to_string(),
            _ => {
                result.push_output = Some("could not determine branch".to_string());
                return;
            }
        };

        if PROTECTED_BRANCHES.contains(&branch.as_str())
            && !self.app.config.git.allow_protected_branch_push
        {
            warn!("Refusing to push protected branch '{}'", branch);
            result.push_output = Some(format!("refused push to protected branch '{}'", branch));
            return;
        }

        let remote = self.app.config.git.push_remote.clone();
        match self.git(&["push", remote.as_str(), branch.as_str()], &limits).await {
            Ok(output) if output.success() => {
                result.pushed = true;
                result.push_output = Some(output.combined());
                info!("Pushed {} to {}", branch, remote);
            }
            Ok(output) => {
                result.push_output = Some(output.combined());
                warn!("Push failed: {}", output.combined());
            }
            Err(e) => {
                result.push_output = Some(e.to_string());
                warn!("Push could not run: {}", e);
            }
        }
    }
}

fn classify(error: &BuildErrorLine) -> (BuildErrorKind, FixStrategy) {
    let lower = error.message.to_lowercase();
    let has_duplicate_prefix = {
        let segments: Vec<&str> = error.file.split('/').collect();
        segments.windows(2).any(|w| w[0] == w[1])
    };

    if has_duplicate_prefix {
        (BuildErrorKind::DuplicatePath, FixStrategy::Mechanical)
    } else if lower.contains("cannot find module") || lower.contains("unresolved import") {
        (BuildErrorKind::ModuleNotFound, FixStrategy::AiRepair)
    } else if lower.contains("expected") || lower.contains("unexpected token") {
        (BuildErrorKind::SyntaxError, FixStrategy::AiRepair)
    } else if error
        .code
        .as_deref()
        .map(|c| c.starts_with("TS2"))
        .unwrap_or(false)
        || lower.contains("type")
    {
        (BuildErrorKind::TypeError, FixStrategy::AiRepair)
    } else {
        (BuildErrorKind::Unknown, FixStrategy::AiRepair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(file: &str, code: Option<&str>, message: &str) -> BuildErrorLine {
        BuildErrorLine {
            file: file.to_string(),
            line: Some(1),
            column: Some(1),
            code: code.map(String::from),
            message: message.to_string(),
            raw: message.to_string(),
        }
    }

    #[test]
    fn test_classification() {
        let (kind, strategy) = classify(&error("src/src/a.ts", None, "whatever"));
        assert_eq!(kind, BuildErrorKind::DuplicatePath);
        assert_eq!(strategy, FixStrategy::Mechanical);

        let (kind, _) = classify(&error("src/a.ts", None, "Cannot find module 'x'"));
        assert_eq!(kind, BuildErrorKind::ModuleNotFound);

        let (kind, _) = classify(&error("src/a.ts", Some("TS2304"), "Cannot use name"));
        assert_eq!(kind, BuildErrorKind::TypeError);

        let (kind, strategy) = classify(&error("src/a.ts", None, "mystery failure"));
        assert_eq!(kind, BuildErrorKind::Unknown);
        // Every non-passing error is considered fixable
        assert_eq!(strategy, FixStrategy::AiRepair);
    }

    #[test]
    fn test_progress_tracker_aborts_after_two_stalled_attempts() {
        let mut tracker = ProgressTracker::new();
        tracker.record(5, 0);
        assert!(!tracker.stalled());
        tracker.record(5, 0);
        assert!(tracker.stalled());
    }

    #[test]
    fn test_progress_tracker_resets_on_improvement() {
        let mut tracker = ProgressTracker::new();
        tracker.record(5, 0);
        tracker.record(3, 0); // fewer errors counts as progress
        assert!(!tracker.stalled());
        tracker.record(3, 1); // a fix counts as progress
        assert!(!tracker.stalled());
        tracker.record(3, 0);
        tracker.record(3, 0);
        assert!(tracker.stalled());
    }
}
