//! Multi-agent orchestrator CLI. Binary name: `orchestrator`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Arg, Command as ClapCommand};
use orch_core::OrchestrationConfig;

mod commands;
mod engine;
mod paths;
mod spawn;
mod task_status;

use commands::{abort, cleanup, init, plan, preflight, resume, status, validate, worktrees};
use paths::Layout;

/// Process exit codes (spec.md 6): `0` success, `1` general failure,
/// `2` a task is blocked and needs a human to unblock it.
const EXIT_OK: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_BLOCKED: u8 = 2;

fn build_cli() -> ClapCommand {
    ClapCommand::new("orchestrator")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Orchestrator Contributors")
        .about("Runs a fleet of isolated coding agents against a plan, one wave at a time")
        .subcommand_required(false)
        .arg(
            Arg::new("root")
                .long("root")
                .global(true)
                .value_name("PATH")
                .help("Repository root (defaults to the current directory)"),
        )
        .subcommand(ClapCommand::new("init").about("Scaffold .claude-agents.yaml and .orchestrator/"))
        .subcommand(ClapCommand::new("preflight").about("Check that git, tmux, and an agent launcher are all reachable"))
        .subcommand(
            ClapCommand::new("validate")
                .about("Parse and validate a plan file without running anything")
                .arg(Arg::new("plan_file").required(true).help("Path to tasks.yaml or tasks.json")),
        )
        .subcommand(
            ClapCommand::new("plan")
                .about("Plan a request and run it: planner -> risk gate -> waves -> merge")
                .arg(Arg::new("request").help("The request to plan (omit with --plan-file)"))
                .arg(
                    Arg::new("plan-file")
                        .long("plan-file")
                        .value_name("PATH")
                        .help("Skip the planner and use an already-written plan file"),
                )
                .arg(
                    Arg::new("approve")
                        .long("approve")
                        .action(clap::ArgAction::SetTrue)
                        .help("Approve a plan that needs human sign-off before it runs"),
                ),
        )
        .subcommand(
            ClapCommand::new("status")
                .about("Show the effective status of every task in the current orchestration")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(clap::ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            ClapCommand::new("resume")
                .about("Reconcile an interrupted orchestration and continue it")
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(clap::ArgAction::SetTrue)
                        .help("Report what would be reconciled without changing anything"),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(clap::ArgAction::SetTrue)
                        .help("Discard uncommitted changes in interrupted worktrees instead of recovery-committing them"),
                ),
        )
        .subcommand(
            ClapCommand::new("abort")
                .about("Stop the current orchestration, killing live sessions")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(clap::ArgAction::SetTrue)
                        .help("Discard uncommitted changes instead of recovery-committing them"),
                ),
        )
        .subcommand(
            ClapCommand::new("cleanup")
                .about("Prune stale worktrees and signal files")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(clap::ArgAction::SetTrue)
                        .help("Ignore the signal-file age threshold"),
                ),
        )
        .subcommand(
            ClapCommand::new("worktrees")
                .about("List task worktrees")
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(clap::ArgAction::SetTrue)
                        .help("Include the main checkout's own worktree entry"),
                ),
        )
}

fn repo_root(matches: &clap::ArgMatches) -> Result<PathBuf> {
    match matches.get_one::<String>("root") {
        Some(path) => Ok(PathBuf::from(path)),
        None => std::env::current_dir().map_err(|e| anyhow!("failed to determine current directory: {e}")),
    }
}

fn load_config(root: &Path) -> Result<OrchestrationConfig> {
    let config_path = Layout::new(root).config_file();
    OrchestrationConfig::load(&config_path).map_err(anyhow::Error::from)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();
    let root = repo_root(&matches)?;

    let code = match matches.subcommand() {
        Some(("init", _)) => {
            init::run(&root)?;
            EXIT_OK
        }
        Some(("preflight", _)) => {
            let results = preflight::run_checks(&root);
            for result in &results {
                println!("{} {}: {}", if result.ok { "ok  " } else { "FAIL" }, result.name, result.detail);
            }
            if results.iter().any(|r| !r.ok && r.name != "ulimit-nofile") {
                EXIT_FAILURE
            } else {
                EXIT_OK
            }
        }
        Some(("validate", sub_m)) => {
            let plan_file = sub_m
                .get_one::<String>("plan_file")
                .ok_or_else(|| anyhow!("plan file path is required"))?;
            let report = validate::run(Path::new(plan_file))?;
            match &report.plan {
                Some(plan) => {
                    println!("plan is valid: {} task(s)", plan.tasks.len());
                    for warning in &report.warnings {
                        println!("warning: {warning}");
                    }
                    EXIT_OK
                }
                None => {
                    for error in &report.errors {
                        eprintln!("error: {error}");
                    }
                    EXIT_FAILURE
                }
            }
        }
        Some(("plan", sub_m)) => {
            let config = load_config(&root)?;
            let plan_file = sub_m.get_one::<String>("plan-file").map(|s| Path::new(s.as_str()));
            let request = sub_m.get_one::<String>("request").cloned().unwrap_or_default();
            if plan_file.is_none() && request.is_empty() {
                return Err(anyhow!("either a request or --plan-file is required"));
            }
            let approve = sub_m.get_flag("approve");
            let outcome = plan::run(&root, config, &request, plan_file, approve).await?;
            print_plan_outcome(&outcome)
        }
        Some(("status", sub_m)) => {
            let report = status::run(&root).await?;
            if sub_m.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status_report(&report);
            }
            if status::has_blocked_task(&report) {
                EXIT_BLOCKED
            } else if report.tasks.iter().any(|t| t.status == orch_state::TaskStatus::Failed) {
                EXIT_FAILURE
            } else {
                EXIT_OK
            }
        }
        Some(("resume", sub_m)) => {
            let config = load_config(&root)?;
            let force = sub_m.get_flag("force");
            let dry_run = sub_m.get_flag("dry-run");
            match resume::run(&root, config, force, dry_run).await? {
                resume::ResumeOutcome::WouldReconcile(ids) => {
                    println!("would reconcile {} interrupted task(s): {}", ids.len(), ids.join(", "));
                    EXIT_OK
                }
                resume::ResumeOutcome::Ran(report) => print_run_report(&report),
            }
        }
        Some(("abort", sub_m)) => {
            let config = load_config(&root)?;
            let force = sub_m.get_flag("force");
            let aborted = abort::run(&root, config, force).await?;
            println!("aborted {} task(s): {}", aborted.len(), aborted.join(", "));
            EXIT_OK
        }
        Some(("cleanup", sub_m)) => {
            let config = load_config(&root)?;
            let force = sub_m.get_flag("force");
            let report = cleanup::run(&root, config, force).await?;
            println!(
                "removed {} stale worktree(s), {} stale signal file(s)",
                report.worktrees_removed, report.signals_removed
            );
            EXIT_OK
        }
        Some(("worktrees", sub_m)) => {
            let config = load_config(&root)?;
            let include_base = sub_m.get_flag("all");
            let rows = worktrees::run(&root, config, include_base).await?;
            for row in &rows {
                let task = row.task_id.as_deref().unwrap_or("-");
                let status = row.status.map_or_else(|| "-".to_string(), |s| format!("{s:?}"));
                println!("{}  task={task}  status={status}  head={}", row.entry.path.display(), row.entry.head);
            }
            EXIT_OK
        }
        _ => {
            build_cli().print_help()?;
            EXIT_OK
        }
    };

    Ok(ExitCode::from(code))
}

fn print_plan_outcome(outcome: &plan::PlanOutcome) -> u8 {
    println!(
        "risk score {} ({}auto-approved)",
        outcome.risk.score,
        if outcome.risk.auto_approve { "" } else { "not " }
    );
    match &outcome.report {
        None => {
            println!("plan requires approval: re-run with --approve, or `touch .orchestrator/approval`");
            EXIT_OK
        }
        Some(report) => print_run_report(report),
    }
}

fn print_run_report(report: &engine::RunReport) -> u8 {
    let mut blocked = false;
    let mut failed = false;
    for (id, outcome) in &report.outcomes {
        match outcome {
            engine::TaskOutcome::Merged { commit } => println!("{id}: merged ({commit})"),
            engine::TaskOutcome::Failed { reason } => {
                println!("{id}: failed ({reason})");
                failed = true;
            }
            engine::TaskOutcome::Blocked { reason } => {
                println!("{id}: blocked ({reason})");
                blocked = true;
            }
            engine::TaskOutcome::SkippedDependencyFailed { depends_on } => {
                println!("{id}: skipped (dependency {depends_on} failed)");
                failed = true;
            }
        }
    }
    if blocked {
        EXIT_BLOCKED
    } else if failed {
        EXIT_FAILURE
    } else {
        EXIT_OK
    }
}

fn print_status_report(report: &status::StatusReport) {
    println!("{} ({}) - phase {} iteration {}", report.request_id, report.original_request, report.current_phase, report.iteration);
    println!("environment: {}", report.environment_hash);
    for task in &report.tasks {
        let blocked = if task.blocked {
            format!(" [blocked: {}]", task.blocked_reason.as_deref().unwrap_or("needs_dependency"))
        } else {
            String::new()
        };
        println!(
            "  {}: {:?} (attempt {}){}{}",
            task.id,
            task.status,
            task.attempt,
            task.error.as_deref().map_or_else(String::new, |e| format!(" - {e}")),
            blocked
        );
    }
}
