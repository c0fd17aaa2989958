//! Journal reminder commands.

use chrono::Local;
use clap::Subcommand;
use console::style;

use soulo_core::config::ConfigHandle;
use soulo_core::error::SouloResult;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum RemindersAction {
    /// List reminders.
    List,
    /// Add a daily reminder.
    Add {
        /// Time of day, HH:MM (24-hour).
        time: String,
        /// Notification title.
        #[arg(short, long)]
        title: Option<String>,
        /// Notification body.
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Remove a reminder.
    Remove {
        /// Reminder id.
        id: i64,
    },
    /// Turn a reminder on.
    Enable {
        /// Reminder id.
        id: i64,
    },
    /// Turn a reminder off.
    Disable {
        /// Reminder id.
        id: i64,
    },
    /// Show when the next reminder fires.
    Next,
}

pub async fn run(config: ConfigHandle, action: RemindersAction, format: OutputFormat) -> SouloResult<()> {
    let registry = super::init_registry(&config).await?;
    let reminders = registry.reminders.clone();

    match action {
        RemindersAction::List => {
            let all = reminders.list()?;
            match format {
                OutputFormat::Json => super::print_json(&all),
                OutputFormat::Text => {
                    if all.is_empty() {
                        println!("  No reminders set.");
                    } else {
                        let mut table = super::new_table();
                        table.set_header(vec!["ID", "Time", "Title", "Enabled"]);
                        for r in &all {
                            table.add_row(vec![
                                r.id.map(|id| id.to_string()).unwrap_or_default(),
                                r.time.clone(),
                                super::truncate(&r.title, 40),
                                if r.enabled { "yes".to_string() } else { "no".to_string() },
                            ]);
                        }
                        println!("{table}");
                    }
                }
            }
        }
        RemindersAction::Add { time, title, body } => {
            let reminder = reminders.add(&time, title.as_deref(), body.as_deref())?;
            match format {
                OutputFormat::Json => super::print_json(&reminder),
                OutputFormat::Text => {
                    println!(
                        "  {} Reminder set for {} every day.",
                        style("OK").green().bold(),
                        reminder.time
                    );
                }
            }
        }
        RemindersAction::Remove { id } => {
            reminders.remove(id)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({"removed": id})),
                OutputFormat::Text => {
                    println!("  {} Removed reminder {}.", style("OK").green().bold(), id);
                }
            }
        }
        RemindersAction::Enable { id } | RemindersAction::Disable { id } => {
            let enabled = matches!(action, RemindersAction::Enable { .. });
            reminders.set_enabled(id, enabled)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({"id": id, "enabled": enabled})),
                OutputFormat::Text => {
                    println!(
                        "  {} Reminder {} {}.",
                        style("OK").green().bold(),
                        id,
                        if enabled { "enabled" } else { "disabled" }
                    );
                }
            }
        }
        RemindersAction::Next => {
            let now = Local::now().naive_local();
            let next = reminders.next_due(now)?;
            match format {
                OutputFormat::Json => {
                    let value = match &next {
                        Some((reminder, at)) => serde_json::json!({
                            "reminder": reminder,
                            "at": at.format("%Y-%m-%dT%H:%M:%S").to_string(),
                        }),
                        None => serde_json::Value::Null,
                    };
                    super::print_json(&value);
                }
                OutputFormat::Text => match next {
                    Some((reminder, at)) => {
                        let minutes = (at - now).num_minutes();
                        println!(
                            "  Next: {} at {} (in {}h {}m)",
                            style(&reminder.title).bold(),
                            at.format("%a %H:%M"),
                            minutes / 60,
                            minutes % 60
                        );
                    }
                    None => println!("  No enabled reminders."),
                },
            }
        }
    }

    registry.shutdown_all()
}
