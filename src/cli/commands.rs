//! CLI command definitions for research-forge.
//!
//! The CLI is an inspection layer over saved research state: it lists and
//! restores backups, and runs the supervisor, quality gate and progress
//! model against a state file without touching any external source.

use crate::backup::{BackupManager, FsBackend};
use crate::llm::{LiteLlmClient, TextGenerationClient};
use crate::pipeline::{ResearchConfig, SupervisorMode};
use crate::progress::ProgressCalculator;
use crate::quality::QualityAssessor;
use crate::research::ResearchState;
use crate::supervisor::Supervisor;
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Default directory holding backups.
const DEFAULT_BACKUP_DIR: &str = "./backups";

/// Inspection and recovery tooling for research runs.
#[derive(Parser)]
#[command(name = "research-forge")]
#[command(about = "Inspect, assess and recover research pipeline state")]
#[command(version)]
#[command(
    long_about = "research-forge inspects research pipeline state.\n\nIt lists and restores checkpoints, and replays the supervisor, quality gate and progress model against a saved state file.\n\nExample usage:\n  research-forge decide --state ./state.json\n  research-forge backups list acme-crm --backup-dir ./backups"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Manage project backups.
    Backups(BackupsArgs),

    /// Show the supervisor's next decision for a state file (dry run).
    Decide(DecideArgs),

    /// Run the quality gate against a state file.
    Assess(StateArgs),

    /// Compute per-stage and overall progress for a state file.
    Progress(StateArgs),
}

/// Arguments shared by the state inspection commands.
#[derive(Parser, Debug)]
pub struct StateArgs {
    /// Path to a JSON-serialized research state.
    #[arg(short, long)]
    pub state: String,

    /// Output result as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for the decide command.
#[derive(Parser, Debug)]
pub struct DecideArgs {
    #[command(flatten)]
    pub target: StateArgs,

    /// Consult the model configured through LITELLM_* variables.
    #[arg(long)]
    pub llm: bool,
}

/// Arguments for the backups command.
#[derive(Parser, Debug)]
pub struct BackupsArgs {
    /// Backup root directory.
    #[arg(long, default_value = DEFAULT_BACKUP_DIR, global = true)]
    pub backup_dir: String,

    #[command(subcommand)]
    pub command: BackupsSubcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum BackupsSubcommand {
    /// List backups for a project, newest first.
    #[command(alias = "ls")]
    List {
        /// Project identifier.
        project_id: String,

        /// Output result as JSON.
        #[arg(short, long)]
        json: bool,
    },

    /// Verify a backup and write the restored state as JSON.
    Restore {
        /// Backup identifier.
        backup_id: String,

        /// Output file; stdout when omitted.
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Delete a backup.
    #[command(alias = "rm")]
    Delete {
        /// Backup identifier.
        backup_id: String,
    },
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Backups(args) => run_backups_command(args).await,
        Commands::Decide(args) => run_decide_command(args).await,
        Commands::Assess(args) => run_assess_command(args),
        Commands::Progress(args) => run_progress_command(args),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn load_state(path: &str) -> anyhow::Result<ResearchState> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "State file does not exist: {}",
            path.display()
        ));
    }
    let raw = fs::read_to_string(path)?;
    let state: ResearchState = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid state file {}: {}", path.display(), e))?;
    Ok(state)
}

fn load_config() -> anyhow::Result<ResearchConfig> {
    ResearchConfig::from_env().map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn backup_manager(dir: &str, config: &ResearchConfig) -> BackupManager {
    BackupManager::new(Arc::new(FsBackend::new(PathBuf::from(dir))), config.max_backups)
        .with_io_timeout(config.timeouts.backup)
}

// ============================================================================
// Backups
// ============================================================================

async fn run_backups_command(args: BackupsArgs) -> anyhow::Result<()> {
    let config = load_config()?;
    let manager = backup_manager(&args.backup_dir, &config);

    match args.command {
        BackupsSubcommand::List { project_id, json } => {
            let backups = manager.list_backups(&project_id).await;
            if json {
                return print_json(&backups);
            }
            if backups.is_empty() {
                println!("No backups for project {}", project_id);
                return Ok(());
            }
            println!("{} backup(s) for {}:", backups.len(), project_id);
            for manifest in &backups {
                println!(
                    "  {}  {}  {} bytes",
                    manifest.backup_id,
                    manifest.created_at.format("%Y-%m-%d %H:%M:%S"),
                    manifest.size_bytes
                );
            }
            Ok(())
        }
        BackupsSubcommand::Restore { backup_id, output } => {
            let state = manager.restore_backup(&backup_id).await.ok_or_else(|| {
                anyhow::anyhow!("Backup {} is missing or failed verification", backup_id)
            })?;
            let body = serde_json::to_string_pretty(&state)?;
            match output {
                Some(path) => {
                    fs::write(&path, body)?;
                    info!(backup_id = %backup_id, output = %path, "State restored");
                    println!("Restored {} ({}) to {}", state.project_id, state.status, path);
                }
                None => println!("{}", body),
            }
            Ok(())
        }
        BackupsSubcommand::Delete { backup_id } => {
            if manager.delete_backup(&backup_id).await {
                println!("Deleted {}", backup_id);
                Ok(())
            } else {
                Err(anyhow::anyhow!("Backup {} could not be deleted", backup_id))
            }
        }
    }
}

// ============================================================================
// Decide
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DecisionOutput {
    project_id: String,
    status: String,
    next_agent: String,
    reason: String,
    instructions: String,
    should_continue: bool,
    source: String,
}

async fn run_decide_command(args: DecideArgs) -> anyhow::Result<()> {
    let state = load_state(&args.target.state)?;
    let mut config = load_config()?;

    let client: Option<Arc<dyn TextGenerationClient>> = if args.llm {
        match LiteLlmClient::from_env() {
            Ok(client) => {
                config = config.with_supervisor_mode(SupervisorMode::LlmAssisted);
                Some(Arc::new(client))
            }
            Err(e) => {
                warn!(error = %e, "LLM client unavailable, deciding with rules");
                None
            }
        }
    } else {
        None
    };

    let supervisor = Supervisor::from_config(&config, client);
    let decision = supervisor.decide(&state).await;

    let output = DecisionOutput {
        project_id: state.project_id.clone(),
        status: state.status.to_string(),
        next_agent: decision.next_agent.to_string(),
        reason: decision.reason,
        instructions: decision.instructions,
        should_continue: decision.should_continue,
        source: format!("{:?}", decision.source).to_lowercase(),
    };

    if args.target.json {
        return print_json(&output);
    }
    println!("Project:   {} ({})", output.project_id, output.status);
    println!("Next:      {}", output.next_agent);
    println!("Reason:    {}", output.reason);
    if !output.instructions.is_empty() {
        println!("Notes:     {}", output.instructions);
    }
    println!("Continue:  {}", output.should_continue);
    println!("Source:    {}", output.source);
    Ok(())
}

// ============================================================================
// Assess
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssessOutput {
    project_id: String,
    is_complete: bool,
    score: f64,
    raw_score: f64,
    reliability: f64,
    issues: Vec<String>,
    data_gaps: Vec<String>,
    follow_up_queries: Vec<String>,
}

fn run_assess_command(args: StateArgs) -> anyhow::Result<()> {
    let state = load_state(&args.state)?;
    let config = load_config()?;
    let assessment = QualityAssessor::new(config.thresholds.clone(), config.max_iterations)
        .assess(&state);

    let output = AssessOutput {
        project_id: state.project_id.clone(),
        is_complete: assessment.is_complete,
        score: assessment.score,
        raw_score: assessment.raw_score,
        reliability: assessment.reliability,
        issues: assessment.issues.clone(),
        data_gaps: assessment.data_gaps.clone(),
        follow_up_queries: assessment
            .follow_up_queries
            .iter()
            .map(|q| q.query.clone())
            .collect(),
    };

    if args.json {
        return print_json(&output);
    }
    println!(
        "Quality: {:.1}/100 (raw {:.1}, reliability {:.2}) - {}",
        output.score,
        output.raw_score,
        output.reliability,
        if output.is_complete { "complete" } else { "incomplete" }
    );
    for dimension in &assessment.dimensions {
        println!(
            "  {:<12} {:>5.1}/{:<4} coverage {:.0}%",
            dimension.dimension.to_string(),
            dimension.points,
            dimension.weight,
            dimension.coverage * 100.0
        );
    }
    if !output.issues.is_empty() {
        println!("Issues:");
        for issue in &output.issues {
            println!("  - {}", issue);
        }
    }
    if !output.data_gaps.is_empty() {
        println!("Data gaps: {}", output.data_gaps.join(", "));
    }
    if !output.follow_up_queries.is_empty() {
        println!("Follow-up queries:");
        for query in &output.follow_up_queries {
            println!("  - {}", query);
        }
    }
    Ok(())
}

// ============================================================================
// Progress
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressOutput {
    project_id: String,
    status: String,
    overall: f64,
    stages: Vec<StageProgressOutput>,
    message: String,
}

#[derive(Debug, Serialize)]
struct StageProgressOutput {
    stage: String,
    progress: f64,
}

fn run_progress_command(args: StateArgs) -> anyhow::Result<()> {
    let state = load_state(&args.state)?;
    let config = load_config()?;
    let snapshot = ProgressCalculator::new(config.thresholds.clone()).calculate(&state);

    let output = ProgressOutput {
        project_id: state.project_id.clone(),
        status: state.status.to_string(),
        overall: snapshot.overall,
        stages: snapshot
            .stages
            .iter()
            .map(|(agent, progress)| StageProgressOutput {
                stage: agent.to_string(),
                progress: *progress,
            })
            .collect(),
        message: snapshot.message.clone(),
    };

    if args.json {
        return print_json(&output);
    }
    println!(
        "{} ({}): {:.1}% - {}",
        output.project_id, output.status, output.overall, output.message
    );
    for stage in &output.stages {
        println!("  {:<10} {:>5.1}%", stage.stage, stage.progress);
    }
    Ok(())
}
