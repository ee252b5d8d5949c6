//! stoker CLI.
//!
//! Command surface around the loop core: workspace init, the execute and
//! planning loops, burn mode, and queue maintenance.

use clap::{Args, Parser, Subcommand};

use stoker::agent::ClaudeAgent;
use stoker::config::{RunConfig, StokerConfig};
use stoker::controller::{LoopController, LoopOutcome, Phase, StopReason};
use stoker::error::{Error, Result};
use stoker::orchestrator::PhaseOrchestrator;
use stoker::pr::PRManager;
use stoker::sandbox::DockerSandbox;
use stoker::workspace::{self, Workspace};
use stoker::FailurePolicy;

#[derive(Parser)]
#[command(
    name = "stoker",
    version,
    about = "CLI orchestrator for autonomous coding-agent loops"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a .stoker/ workspace in the current directory
    Init {
        /// Overwrite existing prompt and vision templates
        #[arg(long)]
        force: bool,
    },
    /// Open the Docker sandbox and run the loop inside it
    Start(LoopArgs),
    /// Open an interactive Docker shell
    Sandbox,
    /// Run the execute loop against the task queue
    Loop(LoopArgs),
    /// Run the planning loop against the vision document
    Plan(PlanArgs),
    /// Auto mode: plan from the vision document, then execute
    Burn(BurnArgs),
    /// Show task queue status
    Status,
    /// Clear run logs and the progress log (the task queue is kept)
    Clear,
    /// Merge the latest open PR
    Review,
    /// Archive completed tasks
    Cleanup {
        /// Archive name (defaults to a timestamp)
        feature: Option<String>,
    },
}

#[derive(Args)]
struct LoopArgs {
    /// Maximum iterations
    #[arg(long)]
    max: Option<u32>,
    /// Model alias: sonnet, opus, haiku
    #[arg(long)]
    model: Option<String>,
    /// Commit locally, skip branch/push/PR creation
    #[arg(long)]
    local: bool,
}

#[derive(Args)]
struct PlanArgs {
    /// Maximum planning iterations
    #[arg(long)]
    max: Option<u32>,
    /// Model alias: sonnet, opus, haiku
    #[arg(long)]
    model: Option<String>,
}

#[derive(Args)]
struct BurnArgs {
    /// Maximum planning iterations
    #[arg(long)]
    plan_max: Option<u32>,
    /// Maximum execution iterations
    #[arg(long)]
    start_max: Option<u32>,
    /// Model alias: sonnet, opus, haiku
    #[arg(long)]
    model: Option<String>,
    /// Commit locally, skip branch/push/PR creation
    #[arg(long)]
    local: bool,
    /// Run both phases inside the Docker sandbox
    #[arg(long)]
    sandbox: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            if let Error::Config(_) | Error::Uninitialized(_) = e {
                eprintln!("Fix the missing input and rerun; no iterations were started.");
            }
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Init { force } => cmd_init(force),
        Commands::Start(args) => cmd_start(args).await,
        Commands::Sandbox => cmd_sandbox().await,
        Commands::Loop(args) => cmd_loop(args).await,
        Commands::Plan(args) => cmd_plan(args).await,
        Commands::Burn(args) => cmd_burn(args).await,
        Commands::Status => cmd_status(),
        Commands::Clear => cmd_clear(),
        Commands::Review => cmd_review(),
        Commands::Cleanup { feature } => cmd_cleanup(feature),
    }
}

fn current_workspace() -> Result<Workspace> {
    Ok(Workspace::new(std::env::current_dir()?))
}

fn warn_unknown_model(model: &str) {
    if !stoker::KNOWN_MODELS.contains(&model) {
        tracing::warn!(model, "not a known model alias, passing through as-is");
    }
}

/// Loads persistent config plus the pieces every loop command needs.
fn load_run_context(workspace: &Workspace) -> Result<(StokerConfig, FailurePolicy, ClaudeAgent)> {
    workspace.require()?;
    let config = StokerConfig::load(&workspace.config_file())?;
    let policy = FailurePolicy::new(
        config.agent.fatal_patterns.clone(),
        config.agent.fatal_exit_codes.clone(),
    );
    let invoker = ClaudeAgent::new(config.agent.completion_marker.clone())
        .with_cli_path(config.agent.command.clone())
        .with_total_timeout(config.agent.total_timeout());
    Ok((config, policy, invoker))
}

fn cmd_init(force: bool) -> Result<i32> {
    let workspace = current_workspace()?;
    workspace::init(&workspace, force)?;
    println!("Initialized stoker workspace at {}", workspace.dir().display());
    println!();
    println!("Next steps:");
    println!("  1. Edit .stoker/config/vision.md with what you want built");
    println!("  2. Run `stoker plan` to fill the task queue");
    println!("  3. Run `stoker loop` to burn it down");
    Ok(0)
}

async fn cmd_loop(args: LoopArgs) -> Result<i32> {
    let workspace = current_workspace()?;
    let (config, policy, invoker) = load_run_context(&workspace)?;
    let run = RunConfig::from_config(&config)
        .with_model(args.model)
        .with_exec_max(args.max)
        .with_local(args.local);
    warn_unknown_model(&run.model);

    let store = workspace.task_store()?;
    let progress = workspace.progress_log();
    let prompts = workspace::load_exec_prompts(&workspace)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let log_dir = workspace.logs_dir().join(&run_id);

    // Branch up front so every agent commit lands on the run branch.
    let manager = PRManager::new(workspace.root().to_path_buf());
    let branch = if run.local {
        None
    } else {
        let name = format!("stoker/run-{}", &run_id[..8]);
        manager.create_branch(&name)?;
        Some(name)
    };

    let mut controller = LoopController::new(
        Phase::Execute,
        &store,
        &invoker,
        &progress,
        run.exec_max,
        prompts,
        workspace.root(),
    )
    .with_model(Some(run.model.clone()))
    .with_policy(policy)
    .with_run_log_dir(Some(log_dir));

    let outcome = controller.run().await?;
    print_outcome("execute", &outcome);

    if let Some(branch) = branch {
        finalize_pr(&manager, &config, &branch, &outcome);
    }

    Ok(exit_code(&outcome.reason))
}

async fn cmd_plan(args: PlanArgs) -> Result<i32> {
    let workspace = current_workspace()?;
    let (config, policy, invoker) = load_run_context(&workspace)?;
    let run = RunConfig::from_config(&config)
        .with_model(args.model)
        .with_plan_max(args.max);
    warn_unknown_model(&run.model);

    let store = workspace.task_store()?;
    let progress = workspace.progress_log();
    let prompts = workspace::load_plan_prompts(&workspace)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let log_dir = workspace.logs_dir().join(&run_id);

    let mut controller = LoopController::new(
        Phase::Plan,
        &store,
        &invoker,
        &progress,
        run.plan_max,
        prompts,
        workspace.root(),
    )
    .with_model(Some(run.model.clone()))
    .with_policy(policy)
    .with_cleanup_every(run.cleanup_every)
    .with_run_log_dir(Some(log_dir));

    let outcome = controller.run().await?;
    print_outcome("plan", &outcome);

    let report = workspace::status(&workspace)?;
    println!("Task queue now holds {} pending task(s)", report.pending);

    Ok(exit_code(&outcome.reason))
}

async fn cmd_burn(args: BurnArgs) -> Result<i32> {
    let workspace = current_workspace()?;
    let (config, policy, invoker) = load_run_context(&workspace)?;
    let run = RunConfig::from_config(&config)
        .with_model(args.model.clone())
        .with_plan_max(args.plan_max)
        .with_exec_max(args.start_max)
        .with_local(args.local)
        .with_sandbox(args.sandbox);
    warn_unknown_model(&run.model);

    // Vision is a hard precondition for burn; check before any branching.
    let plan_prompts = workspace::load_plan_prompts(&workspace)?;

    if run.sandbox {
        // Re-enter inside the container, minus the sandbox flag.
        let sandbox = DockerSandbox::new(workspace.root(), config.sandbox.image.clone());
        let mut inner = vec![
            "burn".to_string(),
            "--plan-max".to_string(),
            run.plan_max.to_string(),
            "--start-max".to_string(),
            run.exec_max.to_string(),
            "--model".to_string(),
            run.model.clone(),
        ];
        if run.local {
            inner.push("--local".to_string());
        }
        return sandbox.run_command(&inner).await;
    }

    let store = workspace.task_store()?;
    let progress = workspace.progress_log();
    let exec_prompts = workspace::load_exec_prompts(&workspace)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let log_dir = workspace.logs_dir().join(&run_id);

    let manager = PRManager::new(workspace.root().to_path_buf());
    let branch = if run.local {
        None
    } else {
        let name = format!("stoker/burn-{}", &run_id[..8]);
        manager.create_branch(&name)?;
        Some(name)
    };

    let orchestrator = PhaseOrchestrator::new(
        &store,
        &invoker,
        &progress,
        &run,
        plan_prompts,
        exec_prompts,
        workspace.root(),
    )
    .with_policy(policy)
    .with_run_log_dir(Some(log_dir));

    let outcome = orchestrator.run().await?;

    print_outcome("plan", &outcome.plan);
    match &outcome.execute {
        Some(exec) => print_outcome("execute", exec),
        None => eprintln!("Execute phase skipped: plan phase stopped fatally."),
    }

    if outcome.success() {
        if let Some(branch) = branch {
            if let Some(exec) = &outcome.execute {
                finalize_pr(&manager, &config, &branch, exec);
            }
        }
        Ok(0)
    } else {
        Ok(1)
    }
}

async fn cmd_start(args: LoopArgs) -> Result<i32> {
    let workspace = current_workspace()?;
    workspace.require()?;
    let config = StokerConfig::load(&workspace.config_file())?;
    let run = RunConfig::from_config(&config)
        .with_model(args.model)
        .with_exec_max(args.max)
        .with_local(args.local);

    let sandbox = DockerSandbox::new(workspace.root(), config.sandbox.image.clone());
    let mut inner = vec![
        "loop".to_string(),
        "--max".to_string(),
        run.exec_max.to_string(),
        "--model".to_string(),
        run.model.clone(),
    ];
    if run.local {
        inner.push("--local".to_string());
    }
    sandbox.run_command(&inner).await
}

async fn cmd_sandbox() -> Result<i32> {
    let workspace = current_workspace()?;
    workspace.require()?;
    let config = StokerConfig::load(&workspace.config_file())?;
    let sandbox = DockerSandbox::new(workspace.root(), config.sandbox.image.clone());
    sandbox.interactive_shell().await
}

fn cmd_status() -> Result<i32> {
    let workspace = current_workspace()?;
    workspace.require()?;
    let report = workspace::status(&workspace)?;

    println!("Pending tasks:   {}", report.pending);
    println!("Completed tasks: {}", report.done);
    match report.next {
        Some(id) => println!("Next up:         {id}"),
        None => println!("Next up:         (queue empty)"),
    }
    Ok(0)
}

fn cmd_clear() -> Result<i32> {
    let workspace = current_workspace()?;
    workspace.require()?;
    workspace::clear(&workspace)?;
    println!("Cleared run logs and progress history; task queue untouched.");
    Ok(0)
}

fn cmd_review() -> Result<i32> {
    let workspace = current_workspace()?;
    workspace.require()?;
    let manager = PRManager::new(workspace.root().to_path_buf());

    match manager.latest_open_pr()? {
        Some(pr) => {
            println!("Merging PR #{}: {}", pr.number, pr.title);
            manager.merge_pr(pr.number)?;
            println!("Merged {}", pr.url);
            Ok(0)
        }
        None => {
            println!("No open PRs to review.");
            Ok(0)
        }
    }
}

fn cmd_cleanup(feature: Option<String>) -> Result<i32> {
    let workspace = current_workspace()?;
    workspace.require()?;
    let (dest, moved) = workspace::archive(&workspace, feature.as_deref())?;
    println!("Archived {} task(s) to {}", moved, dest.display());
    Ok(0)
}

/// Prints one user-visible line per stop, with remedial action on fatals.
fn print_outcome(phase: &str, outcome: &LoopOutcome) {
    match &outcome.reason {
        StopReason::BudgetExhausted => println!(
            "{phase} loop stopped: budget exhausted after {} iteration(s), {} task(s) completed",
            outcome.iterations, outcome.tasks_completed
        ),
        StopReason::NoWorkRemaining => println!(
            "{phase} loop stopped: no work remaining after {} iteration(s), {} task(s) completed",
            outcome.iterations, outcome.tasks_completed
        ),
        StopReason::CompletionSignaled => println!(
            "{phase} loop stopped: completion signaled after {} iteration(s)",
            outcome.iterations
        ),
        StopReason::AgentFailureFatal(reason) => {
            eprintln!(
                "{phase} loop stopped: fatal agent failure after {} iteration(s): {reason}",
                outcome.iterations
            );
            eprintln!(
                "Inspect the workspace (`git status`) and the run logs under \
                 .stoker/logs/ before rerunning."
            );
        }
    }
}

fn exit_code(reason: &StopReason) -> i32 {
    if reason.is_fatal() {
        1
    } else {
        0
    }
}

/// Commits leftovers, pushes the run branch, and opens a PR.
///
/// Failures here are logged, not fatal: the loop outcome already stands and
/// the branch remains for manual follow-up.
fn finalize_pr(manager: &PRManager, config: &StokerConfig, branch: &str, outcome: &LoopOutcome) {
    if outcome.reason.is_fatal() {
        tracing::warn!(branch, "skipping PR for fatally stopped run");
        return;
    }

    if let Err(e) = manager.commit_changes("stoker: commit loop leftovers") {
        tracing::warn!(error = %e, "failed to commit leftovers");
    }
    if let Err(e) = manager.push_branch(branch) {
        tracing::warn!(error = %e, branch, "failed to push run branch");
        return;
    }

    let title = format!(
        "stoker: {} task(s) over {} iteration(s)",
        outcome.tasks_completed, outcome.iterations
    );
    let body = format!(
        "Automated run on `{branch}`.\n\n- Iterations: {}\n- Tasks completed: {}\n- Stop reason: {:?}\n",
        outcome.iterations, outcome.tasks_completed, outcome.reason
    );
    match manager.create_pr(&title, &body, branch, &config.git.base_branch) {
        Ok(pr) => println!("Opened PR: {}", pr.url),
        Err(e) => tracing::warn!(error = %e, "failed to create PR"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn loop_args_parse() {
        let cli = Cli::parse_from(["stoker", "loop", "--max", "10", "--model", "opus", "--local"]);
        match cli.command {
            Commands::Loop(args) => {
                assert_eq!(args.max, Some(10));
                assert_eq!(args.model.as_deref(), Some("opus"));
                assert!(args.local);
            }
            _ => panic!("expected loop command"),
        }
    }

    #[test]
    fn burn_args_parse() {
        let cli = Cli::parse_from([
            "stoker",
            "burn",
            "--plan-max",
            "20",
            "--start-max",
            "8",
            "--sandbox",
        ]);
        match cli.command {
            Commands::Burn(args) => {
                assert_eq!(args.plan_max, Some(20));
                assert_eq!(args.start_max, Some(8));
                assert!(args.sandbox);
                assert!(!args.local);
            }
            _ => panic!("expected burn command"),
        }
    }

    #[test]
    fn cleanup_accepts_optional_feature() {
        let cli = Cli::parse_from(["stoker", "cleanup", "auth"]);
        match cli.command {
            Commands::Cleanup { feature } => assert_eq!(feature.as_deref(), Some("auth")),
            _ => panic!("expected cleanup command"),
        }
    }

    #[test]
    fn exit_codes_follow_stop_reasons() {
        assert_eq!(exit_code(&StopReason::BudgetExhausted), 0);
        assert_eq!(exit_code(&StopReason::NoWorkRemaining), 0);
        assert_eq!(exit_code(&StopReason::CompletionSignaled), 0);
        assert_eq!(
            exit_code(&StopReason::AgentFailureFatal("broken".to_string())),
            1
        );
    }
}
