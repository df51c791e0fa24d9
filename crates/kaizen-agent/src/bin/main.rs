//! Kaizen agent main executable

use clap::{Arg, Command};
use kaizen_agent::{App, CycleResult, Orchestrator, Scheduler};
use kaizen_common::AgentConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("kaizen-agent")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Autonomous self-improvement agent")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (default: ./config.json)")
                .required(false),
        )
        .arg(
            Arg::new("workspace")
                .short('w')
                .long("workspace")
                .value_name("DIR")
                .help("Override the workspace directory")
                .required(false),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("Run a single cycle, print a report, and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    init_tracing(matches.get_flag("verbose"))?;

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./config.json"));
    let mut config = AgentConfig::load(Path::new(&config_path))?;
    if let Some(workspace) = matches.get_one::<String>("workspace") {
        config.workspace_dir = PathBuf::from(workspace);
    }

    info!("Starting kaizen-agent v{}", env!("CARGO_PKG_VERSION"));
    let check_interval = Duration::from_secs(config.check_interval_secs);
    let repair_enabled = config.repair.enabled;
    let repair_interval = Duration::from_secs(config.repair.poll_interval_secs);

    let app = App::bootstrap(config).await?;
    let orchestrator = Arc::new(Orchestrator::new(app.clone()));

    if matches.get_flag("once") {
        return run_once(&orchestrator).await;
    }

    let scheduler = Scheduler::new();
    {
        let orchestrator = orchestrator.clone();
        scheduler.register("improvement-cycle", check_interval, move || {
            let orchestrator = orchestrator.clone();
            async move {
                match orchestrator.run_cycle().await {
                    Ok(result) => {
                        if !result.skipped_early {
                            info!(
                                "Cycle {} finished (quality: {})",
                                result.cycle_id,
                                result.quality.as_str()
                            );
                        }
                    }
                    Err(e) => warn!("Cycle refused: {}", e),
                }
            }
        });
    }

    let repair_handle = if repair_enabled {
        Some(app.auto_repairer().spawn_worker(repair_interval))
    } else {
        None
    };

    info!(
        "Agent running; cycle every {:?}, press ctrl-c to stop",
        check_interval
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    scheduler.shutdown();
    if let Some(handle) = repair_handle {
        handle.abort();
    }
    Ok(())
}

async fn run_once(orchestrator: &Orchestrator) -> Result<(), Box<dyn std::error::Error>> {
    match orchestrator.run_cycle().await {
        Ok(result) => {
            print_report(&result);
            if result.success {
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Cycle failed to run: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_report(result: &CycleResult) {
    println!("Cycle report");
    println!("  id:           {}", result.cycle_id);
    println!(
        "  status:       {}",
        if result.skipped_early {
            "skipped (no work)"
        } else if result.success {
            "success"
        } else {
            "failed"
        }
    );
    println!("  quality:      {}", result.quality.as_str());
    println!("  duration:     {} ms", result.duration_ms);
    println!("  issues:       {}", result.summary.issue_count);
    println!("  improvements: {}", result.summary.improvement_count);
    println!("  changes:      {}", result.summary.change_count);
    println!(
        "  tests:        {}",
        result.summary.test_summary.as_deref().unwrap_or("not run")
    );
    println!("  tokens:       {}", result.summary.token_total);
    println!("  troubles:     {}", result.trouble_count);
    if let Some(phase) = result.failed_phase {
        println!("  failed phase: {}", phase);
    }
    if let Some(reason) = &result.retry_reason {
        println!("  retry:        {}", reason);
    }
}

fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let default_filter = if verbose { "debug" } else { "kaizen_agent=info,kaizen_common=info,kaizen_learning=info,kaizen_queue=info,kaizen_safety=info,kaizen_repair=info,kaizen_provider=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}
