//! Soulo CLI - Command-line interface for the Soulo journal backend.
//!
//! Asks questions of the journal through the retrieval pipeline, inspects
//! how a question would be classified and planned, manages entries, chat
//! threads and reminders, and runs the edge-function HTTP server.

mod commands;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use tracing::debug;

use soulo_core::config::{AppConfig, ConfigHandle};
use soulo_core::error::SouloError;
use soulo_core::logging;

/// Soulo - talk to your voice journal.
#[derive(Parser)]
#[command(
    name = "soulo",
    version,
    about = "Soulo voice journal CLI",
    long_about = "A command-line interface for the Soulo voice journal backend.\n\
                   Ask questions about your journal, manage entries and threads, and serve the HTTP handlers."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question about your journal.
    Ask {
        /// The question.
        question: String,
        /// Continue an existing chat thread.
        #[arg(short, long)]
        thread: Option<String>,
        /// Start a new chat thread for this question.
        #[arg(long, conflicts_with = "thread")]
        new_thread: bool,
        /// User id (defaults to storage.default_user_id).
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Show how a question is classified.
    Classify {
        /// The question.
        question: String,
    },
    /// Show the search plan and routing for a question without running it.
    Plan {
        /// The question.
        question: String,
    },
    /// Create and browse journal entries.
    Journal {
        #[command(subcommand)]
        action: commands::journal::JournalAction,
    },
    /// Manage chat threads.
    Threads {
        #[command(subcommand)]
        action: commands::threads::ThreadsAction,
    },
    /// Manage journal reminders.
    Reminders {
        #[command(subcommand)]
        action: commands::reminders::RemindersAction,
    },
    /// Run the edge-function HTTP server.
    Serve {
        /// Port to listen on (overrides config).
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind (overrides config).
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// View and create the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Show configuration, storage and service status.
    Status,
    /// Local database management commands.
    Db {
        #[command(subcommand)]
        action: commands::db::DbAction,
    },
}

/// Load the config file (explicit path or default location) and apply
/// `SOULO_*` environment overrides.
fn load_config(path: Option<&str>) -> anyhow::Result<(AppConfig, PathBuf)> {
    let path = match path {
        Some(p) => PathBuf::from(p),
        None => AppConfig::default_config_path()?,
    };
    let mut config = if path.exists() {
        AppConfig::load_from_file(&path)
            .with_context(|| format!("reading {}", path.display()))?
    } else {
        AppConfig::default()
    };
    config.apply_env_overrides();
    Ok((config, path))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = cli.format;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<SouloError>()
                .map(SouloError::error_code)
                .unwrap_or("internal_error");
            match format {
                OutputFormat::Json => commands::print_json(&serde_json::json!({
                    "error": format!("{err:#}"),
                    "errorCode": code,
                })),
                OutputFormat::Text => eprintln!("{} {err:#} ({code})", style("error:").red().bold()),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (config, config_path) = load_config(cli.config.as_deref())?;

    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| Path::new(".").join("logs"));
    let _guard = logging::init_from_config(&config.logging, &log_dir, cli.verbose)?;
    debug!(config = %config_path.display(), version = soulo_core::constants::APP_VERSION, "soulo starting");

    let config = ConfigHandle::new(config);
    let format = cli.format;

    match cli.command {
        Commands::Ask { question, thread, new_thread, user } => {
            commands::ask::run(config, question, thread, new_thread, user, format).await?
        }
        Commands::Classify { question } => commands::ask::classify(config, question, format).await?,
        Commands::Plan { question } => commands::ask::plan(config, question, format).await?,
        Commands::Journal { action } => commands::journal::run(config, action, format).await?,
        Commands::Threads { action } => commands::threads::run(config, action, format).await?,
        Commands::Reminders { action } => commands::reminders::run(config, action, format).await?,
        Commands::Serve { port, bind } => commands::serve::run(config, port, bind).await?,
        Commands::Config { action } => {
            commands::config::run(config, config_path, action, format).await?
        }
        Commands::Status => commands::status::run(config, format).await?,
        Commands::Db { action } => commands::db::run(config, action, format).await?,
    }
    Ok(())
}
