//! Local database management commands.

use clap::Subcommand;
use console::style;
use dialoguer::Confirm;

use soulo_core::config::ConfigHandle;
use soulo_core::error::SouloResult;
use soulo_models::Database;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum DbAction {
    /// Show database statistics.
    Stats,
    /// Run an integrity check.
    Check,
    /// Reset the database (WARNING: destroys all local data).
    Reset {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the database file path.
    Path,
}

pub async fn run(config: ConfigHandle, action: DbAction, format: OutputFormat) -> SouloResult<()> {
    let cfg = config.snapshot().await;
    let db_path = cfg.effective_db_path()?;

    match action {
        DbAction::Stats => {
            let db = Database::init(&db_path, &cfg.database)?;
            let stats = db.stats()?;
            let usage = db.disk_usage();
            let journal_mode = db.journal_mode().unwrap_or_else(|_| "unknown".to_string());

            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "path": db.path().display().to_string(),
                    "tables": stats,
                    "disk": usage,
                    "journal_mode": journal_mode,
                })),
                OutputFormat::Text => {
                    let mut table = super::new_table();
                    table.set_header(vec!["Table", "Rows"]);
                    for (name, rows) in [
                        ("journal_entries", stats.journal_entries),
                        ("  embedded", stats.embedded_entries),
                        ("chat_threads", stats.chat_threads),
                        ("chat_messages", stats.chat_messages),
                        ("reminders", stats.reminders),
                    ] {
                        table.add_row(vec![name.to_string(), rows.to_string()]);
                    }

                    println!("{} {}", style("Journal store").bold(), style(db.path().display()).dim());
                    let size = |bytes: Option<u64>| bytes.map(super::format_bytes).unwrap_or_else(|| "-".into());
                    println!("  file {} / wal {} / mode {journal_mode}", size(usage.db_bytes), size(usage.wal_bytes));
                    println!("{table}");
                }
            }
        }
        DbAction::Check => {
            let db = Database::init(&db_path, &cfg.database)?;
            let result = db.run_integrity_check();
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({
                        "ok": result.is_ok(),
                        "error": result.as_ref().err().map(|e| e.to_string()),
                    }));
                }
                OutputFormat::Text => match &result {
                    Ok(()) => println!("  {} Integrity check passed.", style("OK").green().bold()),
                    Err(e) => println!("  {} {}", style("FAIL").red().bold(), e),
                },
            }
            result?;
        }
        DbAction::Reset { yes } => {
            if !yes {
                println!(
                    "  {} This will delete ALL local entries, threads and reminders.",
                    style("WARNING").red().bold()
                );
                println!("  Database: {}", db_path.display());

                let confirmed = Confirm::new()
                    .with_prompt("  Are you sure you want to reset the database?")
                    .default(false)
                    .interact()
                    .unwrap_or(false);

                if !confirmed {
                    println!("  Reset cancelled.");
                    return Ok(());
                }
            }

            let db = Database::init(&db_path, &cfg.database)?;
            db.reset()?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({"reset": true})),
                OutputFormat::Text => {
                    println!("  {} Database reset complete.", style("OK").green().bold());
                }
            }
        }
        DbAction::Path => match format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"path": db_path.display().to_string()}));
            }
            OutputFormat::Text => println!("{}", db_path.display()),
        },
    }

    Ok(())
}
