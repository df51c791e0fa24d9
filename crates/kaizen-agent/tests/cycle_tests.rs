//! End-to-end cycle scenarios against a temp workspace and static providers

use kaizen_agent::{App, Orchestrator};
use kaizen_common::{AgentConfig, ImprovementKind, QueueStatus};
use kaizen_provider::{ProviderSet, StaticProvider};
use kaizen_queue::NewImprovement;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    app: Arc<App>,
    orchestrator: Orchestrator,
    project: TempDir,
    _workspace: TempDir,
}

async fn write(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(path, content).await.unwrap();
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

async fn fixture(
    build_command: &[&str],
    test_command: &[&str],
    providers: ProviderSet,
) -> Fixture {
    let project = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();

    let mut config = AgentConfig::default();
    config.project_dir = project.path().to_path_buf();
    config.workspace_dir = workspace.path().join("workspace");
    config.build.build_command = argv(build_command);
    config.build.test_command = argv(test_command);
    config.ai.idle_timeout_secs = 10;
    config.ai.max_timeout_secs = 20;

    let app = App::assemble(config, Arc::new(providers)).await.unwrap();
    let orchestrator = Orchestrator::new(app.clone());
    Fixture {
        app,
        orchestrator,
        project,
        _workspace: workspace,
    }
}

fn refactor_item(title: &str, priority: i64, file: &str) -> NewImprovement {
    let mut item = NewImprovement::new(
        "test",
        ImprovementKind::Refactor,
        title,
        format!("{} in the helper module", title),
        priority,
    );
    item.related_file = Some(file.to_string());
    item
}

#[tokio::test]
async fn no_op_cycle_skips_early() {
    let fx = fixture(&["true"], &["true"], ProviderSet::new(None, None, false)).await;

    let result = fx.orchestrator.run_cycle().await.unwrap();
    assert!(result.cycle_id.starts_with("skipped_"));
    assert!(result.success);
    assert!(result.skipped_early);
    assert!(!result.should_retry);
    assert_eq!(result.trouble_count, 0);
    assert!(result.duration_ms < 200);
}

#[tokio::test]
async fn successful_fix_cycle_is_effective_and_learns_a_pattern() {
    let fixed_source = "export function helper(): number {\n    return 1;\n}\n";
    let generated_test =
        "import { helper } from '../src/util';\n\ntest('helper returns 1', () => {\n    expect(helper()).toBe(1);\n});\n";
    let primary = StaticProvider::new(
        "claude",
        vec![fixed_source.to_string(), generated_test.to_string()],
    )
    .with_fallback_response(fixed_source);

    let fx = fixture(
        &["true"],
        &["true"],
        ProviderSet::new(Some(Arc::new(primary)), None, false),
    )
    .await;

    // A marker keeps layer 1 coverage on the file so the bounded AI
    // analysis is not consulted and the canned responses line up.
    write(
        fx.project.path(),
        "src/util.ts",
        "// TODO drop the unused import below\nimport { unused } from './unused';\nexport function helper(): number {\n    return 1;\n}\n",
    )
    .await;

    let queue_id = fx
        .app
        .queue
        .enqueue(refactor_item("Remove unused import", 75, "src/util.ts"))
        .await
        .unwrap()
        .unwrap();

    let result = fx.orchestrator.run_cycle().await.unwrap();
    assert!(result.success, "cycle failed: {:?}", result);
    assert_eq!(result.quality.as_str(), "effective");
    assert!(!result.skipped_early);
    assert!(result.summary.change_count >= 1);

    // The file was rewritten by the provider artifact
    let content = tokio::fs::read_to_string(fx.project.path().join("src/util.ts"))
        .await
        .unwrap();
    assert_eq!(content, fixed_source);

    // The queue item closed out as completed
    let item = fx.app.queue.get(&queue_id).await.unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
    assert_eq!(item.cycle_id.as_deref(), Some(result.cycle_id.as_str()));

    // One pattern learned from the successful fix
    let patterns = fx.app.patterns.all().await;
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].stats.usage_count, 1);
    assert_eq!(patterns[0].stats.success_count, 1);
    assert!((patterns[0].stats.confidence - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn verification_failure_rolls_back_to_snapshot() {
    let original = "export function greet(name: string): string {\n    return name;\n}\n";
    let broken = "export function greet(name: string): string {\n    return nam;\n}\n";
    let primary = StaticProvider::new("claude", vec![]).with_fallback_response(broken);

    // The build command always fails, so verification cannot keep the change
    let fx = fixture(
        &["false"],
        &["true"],
        ProviderSet::new(Some(Arc::new(primary)), None, false),
    )
    .await;

    write(fx.project.path(), "src/app.ts", original).await;
    fx.app
        .queue
        .enqueue(refactor_item("Rework greeting", 80, "src/app.ts"))
        .await
        .unwrap();

    let result = fx.orchestrator.run_cycle().await.unwrap();
    assert!(!result.success);
    assert_eq!(result.quality.as_str(), "failed");
    assert_eq!(
        result.failed_phase.map(|p| p.as_str()),
        Some("verify")
    );
    assert!(result.should_retry);
    assert!(result
        .retry_reason
        .as_deref()
        .unwrap()
        .contains("verification"));

    // Rollback restored the file byte-for-byte
    let content = tokio::fs::read_to_string(fx.project.path().join("src/app.ts"))
        .await
        .unwrap();
    assert_eq!(content, original);
}

#[tokio::test]
async fn repeated_critical_failures_pause_the_system() {
    // No providers: the implement phase fails critically every cycle
    let fx = fixture(&["true"], &["true"], ProviderSet::new(None, None, false)).await;
    write(
        fx.project.path(),
        "src/app.ts",
        "export function greet(): string {\n    return 'hi';\n}\n",
    )
    .await;

    for i in 0..5 {
        fx.app
            .queue
            .enqueue(refactor_item(&format!("Attempt {}", i), 80, "src/app.ts"))
            .await
            .unwrap();
        let result = fx.orchestrator.run_cycle().await.unwrap();
        assert!(!result.success, "cycle {} unexpectedly succeeded", i);
        assert!(result.cycle_id.starts_with("cycle_"));
    }

    let status = fx.orchestrator.status().await;
    assert!(status.system_paused);
    assert_eq!(status.consecutive_failures, 5);

    // The sixth cycle is refused without running phases
    let paused = fx.orchestrator.run_cycle().await.unwrap();
    assert!(paused.cycle_id.starts_with("paused_"));
    assert!(!paused.success);
    assert!(!paused.should_retry);
    assert!(paused.duration_ms < 200);

    // After resuming, cycles run again
    fx.orchestrator.resume_system();
    assert_eq!(fx.orchestrator.status().await.consecutive_failures, 0);
    fx.app
        .queue
        .enqueue(refactor_item("Attempt after resume", 80, "src/app.ts"))
        .await
        .unwrap();
    let resumed = fx.orchestrator.run_cycle().await.unwrap();
    assert!(resumed.cycle_id.starts_with("cycle_"));
}

#[tokio::test]
async fn concurrent_run_cycle_is_refused() {
    // A slow build keeps the first cycle busy long enough to observe overlap
    let fx = fixture(
        &["sleep", "0.5"],
        &["true"],
        ProviderSet::new(None, None, false),
    )
    .await;
    write(fx.project.path(), "src/app.ts", "export const x = 1;\n").await;
    fx.app
        .queue
        .enqueue(refactor_item("Busy work", 50, "src/app.ts"))
        .await
        .unwrap();

    let orchestrator = Arc::new(fx.orchestrator);
    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_cycle().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    let second = orchestrator.run_cycle().await;
    assert!(matches!(second, Err(kaizen_common::Error::CycleInProgress)));

    let first = first.await.unwrap().unwrap();
    assert!(first.cycle_id.starts_with("cycle_"));

    // With the gate released a later cycle is admitted again
    let third = orchestrator.run_cycle().await.unwrap();
    assert!(third.skipped_early || third.cycle_id.starts_with("cycle_"));
}

#[tokio::test]
async fn trouble_dedup_spans_cycles() {
    // Each failing cycle records the same feedback trouble; the dedup
    // window loaded at cycle start keeps the persistent store at one record
    let fx = fixture(&["true"], &["true"], ProviderSet::new(None, None, false)).await;
    write(fx.project.path(), "src/app.ts", "export const x = 1;\n").await;

    for i in 0..2 {
        fx.app
            .queue
            .enqueue(refactor_item(&format!("Round {}", i), 60, "src/app.ts"))
            .await
            .unwrap();
        fx.orchestrator.run_cycle().await.unwrap();
    }

    let troubles = fx.app.troubles.recent(50).await;
    assert!(!troubles.is_empty());

    // No (message, file, category) key appears twice in the store
    let mut keys: Vec<(String, Option<String>, &'static str)> = troubles
        .iter()
        .map(|t| (t.message.clone(), t.file.clone(), t.category.as_str()))
        .collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total);

    // The identical provider failure from both cycles is one record
    let provider_troubles = troubles
        .iter()
        .filter(|t| t.message == "Provider error: No AI provider available")
        .count();
    assert_eq!(provider_troubles, 1);
}
