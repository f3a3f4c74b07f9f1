//! PICKBOARD: resolution and scoring engine for AI provider picks.
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the pick database, and either runs a single resolution pass or serves
//! the HTTP trigger until Ctrl+C.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use pickboard::api::{self, TriggerState};
use pickboard::config::AppConfig;
use pickboard::engine::Orchestrator;
use pickboard::storage::{PickStore, SqliteStore};
use pickboard::types::RunScope;

/// Pickboard - resolve, score and rank AI provider picks.
#[derive(Parser, Debug)]
#[command(name = "pickboard")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one resolution pass and print the summary as JSON
    Run(RunArgs),

    /// Serve the HTTP trigger endpoint
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Competition to resolve (defaults to [competition].id)
    #[arg(long)]
    competition: Option<String>,

    /// Competition week (defaults to the current week)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    week: Option<u32>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen port (defaults to [trigger].port)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    init_logging();

    let cfg = load_config(&cli.config)?;
    info!(
        competition = %cfg.competition.id,
        database = %cfg.storage.database_url,
        "PICKBOARD starting up"
    );

    let store: Arc<dyn PickStore> =
        Arc::new(SqliteStore::connect(&cfg.storage.database_url).await?);
    let orchestrator = Orchestrator::from_config(&cfg, store)?;

    match cli.command {
        Commands::Run(args) => {
            let default_scope = cfg.competition.current_scope();
            let scope = RunScope::new(
                args.competition.unwrap_or(default_scope.competition_id),
                args.week.unwrap_or(default_scope.week),
            );

            let summary = orchestrator.run(&scope).await?;
            for err in &summary.errors {
                warn!(error = %err, "Run reported error");
            }
            info!("{summary}");
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to encode summary")?
            );
        }
        Commands::Serve(args) => {
            let secret = cfg.trigger.secret();
            if secret.is_none() {
                warn!(
                    env = %cfg.trigger.secret_env,
                    allow_manual = cfg.trigger.allow_manual,
                    "Trigger secret not set, authenticated triggers will be refused"
                );
            }

            let state = Arc::new(TriggerState {
                orchestrator,
                secret,
                allow_manual: cfg.trigger.allow_manual,
                competition: cfg.competition.clone(),
            });

            let port = args.port.unwrap_or(cfg.trigger.port);
            api::serve(state, port, async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received.");
            })
            .await?;
        }
    }

    Ok(())
}

/// Load the TOML config, falling back to defaults when the file is absent.
fn load_config(path: &str) -> Result<AppConfig> {
    if Path::new(path).exists() {
        AppConfig::load(path)
    } else {
        warn!(path, "Config file not found, using defaults");
        Ok(AppConfig::default())
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pickboard=info,tower_http=info"));

    let json_logging = std::env::var("PICKBOARD_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
