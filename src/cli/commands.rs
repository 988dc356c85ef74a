//! CLI command definitions for trapforge.

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use serde_json::Value;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::difficulty::DifficultyLevel;
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::pipeline::{parse_validator_profile, Orchestrator, PipelineConfig};
use crate::server::{serve, AppState};
use crate::storage::{MemoryRunStore, RunStore, SqliteRunStore};
use crate::stream::{StreamAdapter, StreamEvent};
use crate::validation::AssessmentValidator;

/// Default listen address for `serve`.
const DEFAULT_ADDR: &str = "0.0.0.0:8000";

/// Adversarial assessment generator.
#[derive(Parser)]
#[command(name = "trapforge")]
#[command(about = "Generate assessments that strong models pass and weak models fail")]
#[command(version)]
#[command(
    long_about = "trapforge builds a catalog of conceptual mistakes for a topic, writes a challenge that targets them, \
keeps only challenges a weak model falls for while a mid model does not, and turns the weak answer into a \
student assessment with marked flaws.\n\nExample usage:\n  trapforge run \"SQL window functions\" --max-attempts 3"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the workflow for one topic.
    Run(RunArgs),

    /// Serve the HTTP API.
    Serve(ServeArgs),

    /// Validate an assessment JSON file.
    Validate(ValidateArgs),

    /// Print a stored run.
    Show(ShowArgs),
}

/// Provider and store options shared by `run` and `serve`.
#[derive(clap::Args, Debug, Clone)]
pub struct ProviderArgs {
    /// OpenRouter API key; without one the LiteLLM environment is used.
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// SQLite database for run records.
    #[arg(long, env = "TRAPFORGE_DATABASE_PATH")]
    pub db: Option<PathBuf>,

    /// Keep run records in memory only.
    #[arg(long)]
    pub no_persist: bool,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Topic to build an assessment for.
    pub topic: String,

    /// Outer attempts through stages 3 to 6 (1 to 5).
    #[arg(short = 'a', long)]
    pub max_attempts: Option<u32>,

    /// Preferred difficulty tier (beginner, intermediate, advanced).
    #[arg(short, long)]
    pub difficulty: Option<String>,

    /// Validator profile (default or strict).
    #[arg(long)]
    pub validator_profile: Option<String>,

    /// Print events as SSE frames instead of one line per stage.
    #[arg(long)]
    pub sse: bool,

    /// Print the final outcome as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,

    #[command(flatten)]
    pub provider: ProviderArgs,
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen address.
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub addr: SocketAddr,

    #[command(flatten)]
    pub provider: ProviderArgs,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// JSON file holding one assessment object.
    pub file: PathBuf,

    /// Validator profile (default or strict).
    #[arg(long)]
    pub validator_profile: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ShowArgs {
    pub run_id: String,

    /// SQLite database to read.
    #[arg(long, env = "TRAPFORGE_DATABASE_PATH", default_value = "trapforge.db")]
    pub db: PathBuf,

    /// Include full step responses.
    #[arg(long)]
    pub full: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse arguments and run the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_run_command(args).await,
        Commands::Serve(args) => run_serve_command(args).await,
        Commands::Validate(args) => run_validate_command(args),
        Commands::Show(args) => run_show_command(args).await,
    }
}

fn build_provider(api_key: Option<&str>) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        info!("Using OpenRouter with specified API key");
        return Ok(Arc::new(LiteLlmClient::openrouter(key.to_string())?));
    }
    info!("Using LiteLLM client from environment");
    let client = LiteLlmClient::from_env().context(
        "Failed to initialize LLM client. Provide --api-key or set OPENROUTER_API_KEY/LITELLM_API_BASE",
    )?;
    Ok(Arc::new(client))
}

async fn build_store(args: &ProviderArgs, config: &PipelineConfig) -> anyhow::Result<Arc<dyn RunStore>> {
    if args.no_persist {
        return Ok(Arc::new(MemoryRunStore::new()));
    }
    let path = args.db.clone().unwrap_or_else(|| config.database_path.clone());
    let store = SqliteRunStore::open(&path)
        .await
        .with_context(|| format!("Failed to open run store at {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Environment configuration with command-line overrides applied.
fn resolve_config(
    max_attempts: Option<u32>,
    difficulty: Option<&str>,
    validator_profile: Option<&str>,
) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env().context("Invalid TRAPFORGE_* environment")?;
    if let Some(attempts) = max_attempts {
        config = config.with_max_attempts(attempts);
    }
    if let Some(value) = difficulty {
        let level = DifficultyLevel::parse_loose(value)
            .with_context(|| format!("Unknown difficulty '{}'", value))?;
        config = config.with_preferred_difficulty(Some(level));
    }
    if let Some(profile) = validator_profile {
        config = config.with_validator(parse_validator_profile(profile)?);
    }
    config.validate()?;
    Ok(config)
}

async fn run_run_command(args: RunArgs) -> anyhow::Result<()> {
    let config = resolve_config(
        args.max_attempts,
        args.difficulty.as_deref(),
        args.validator_profile.as_deref(),
    )?;
    let provider = build_provider(args.provider.api_key.as_deref())?;
    let store = build_store(&args.provider, &config).await?;
    let adapter = StreamAdapter::new(Arc::new(Orchestrator::new(provider, store, config)));

    let events = adapter.events(args.topic.clone());
    tokio::pin!(events);

    let mut stdout = std::io::stdout();
    let mut done: Option<StreamEvent> = None;
    while let Some(event) = events.next().await {
        if args.sse {
            stdout.write_all(event.to_sse_frame()?.as_bytes())?;
            stdout.flush()?;
        } else if !args.json {
            print_event(&event);
        }
        if event.is_terminal() {
            done = Some(event);
        }
    }

    match done {
        Some(StreamEvent::Done { run_id, outcome, total_duration_seconds, .. }) => {
            if args.json && !args.sse {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            info!(run_id = %run_id, duration_s = total_duration_seconds, "Run complete");
            if !outcome.final_success {
                anyhow::bail!("Run {} blocked at stage {}", run_id, outcome.stopped_at_stage);
            }
            Ok(())
        }
        Some(StreamEvent::Error { error, .. }) => anyhow::bail!("Run failed: {}", error),
        _ => anyhow::bail!("Run ended without a terminal event"),
    }
}

fn print_event(event: &StreamEvent) {
    match event {
        StreamEvent::Start { topic, .. } => println!("Starting run for '{}'", topic),
        StreamEvent::Step(step) => {
            let attempt = step
                .attempt
                .map(|n| format!(" (attempt {})", n))
                .unwrap_or_default();
            println!(
                "[{}] {}{} via {} [{}]: {}",
                step.stage_index,
                step.stage_name,
                attempt,
                step.model,
                step.tier,
                if step.success { "ok" } else { "failed" }
            );
        }
        StreamEvent::Done { outcome, total_duration_seconds, .. } => {
            println!(
                "Finished in {:.1}s: stopped at stage {} after {} attempt(s), success = {}",
                total_duration_seconds, outcome.stopped_at_stage, outcome.attempts, outcome.final_success
            );
            if let Some(assessment) = &outcome.assessment {
                println!("\n{}\n\n{}", assessment.title, assessment.joined_content());
            }
        }
        StreamEvent::Error { error, .. } => eprintln!("Error: {}", error),
    }
}

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let config = resolve_config(None, None, None)?;
    let provider = build_provider(args.provider.api_key.as_deref())?;
    let store = build_store(&args.provider, &config).await?;
    let state = Arc::new(AppState::new(provider, store, config));
    serve(args.addr, state)
        .await
        .with_context(|| format!("Server on {} stopped", args.addr))
}

fn run_validate_command(args: ValidateArgs) -> anyhow::Result<()> {
    let validator = match args.validator_profile.as_deref() {
        Some(profile) => AssessmentValidator::new(parse_validator_profile(profile)?),
        None => AssessmentValidator::default(),
    };
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let raw: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", args.file.display()))?;

    match validator.validate(&raw) {
        Ok(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        Err(issues) => {
            for issue in &issues {
                eprintln!("- {}", issue);
            }
            anyhow::bail!("{} validation issue(s) in {}", issues.len(), args.file.display())
        }
    }
}

async fn run_show_command(args: ShowArgs) -> anyhow::Result<()> {
    let store = SqliteRunStore::open(&args.db)
        .await
        .with_context(|| format!("Failed to open run store at {}", args.db.display()))?;
    let summary = store.run_summary(&args.run_id).await?;
    let mut steps = store.steps_for_run(&args.run_id).await?;
    if !args.full {
        for step in &mut steps {
            step.response = crate::prompts::clip(&step.response, crate::stream::PREVIEW_CHARS).to_string();
        }
    }
    let out = serde_json::json!({ "run": summary, "steps": steps });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from([
            "trapforge",
            "run",
            "Graph search",
            "--max-attempts",
            "4",
            "--difficulty",
            "advanced",
            "--sse",
            "--no-persist",
        ])
        .expect("parse");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.topic, "Graph search");
                assert_eq!(args.max_attempts, Some(4));
                assert!(args.sse);
                assert!(args.provider.no_persist);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_validate_command_reports_issues() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"title": "x"}"#).expect("write");
        let result = run_validate_command(ValidateArgs {
            file: path,
            validator_profile: None,
        });
        assert!(result.is_err());
    }
}
