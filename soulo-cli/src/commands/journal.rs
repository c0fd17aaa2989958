//! Journal entry commands.

use std::io::Read;
use std::path::Path;

use chrono::{Duration, Utc};
use clap::Subcommand;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use soulo_core::config::ConfigHandle;
use soulo_core::error::{SouloError, SouloResult};
use soulo_models::queries::DateWindow;
use soulo_models::JournalEntry;
use soulo_services::journal::ProcessedEntry;
use soulo_services::AppEvent;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum JournalAction {
    /// Write a text entry (reads stdin when no text is given).
    Add {
        /// Entry text.
        text: Option<String>,
        /// User id (defaults to storage.default_user_id).
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Transcribe an audio file and store it as an entry.
    Record {
        /// Path to the recording (wav, mp3, m4a, webm, ogg, flac).
        path: String,
        /// User id (defaults to storage.default_user_id).
        #[arg(short, long)]
        user: Option<String>,
    },
    /// List recent entries.
    List {
        /// Number of entries to show.
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Page number (1-based).
        #[arg(short, long, default_value = "1")]
        page: usize,
        /// Only entries from the last N days.
        #[arg(short, long)]
        days: Option<i64>,
        /// User id (defaults to storage.default_user_id).
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Search entries by keyword.
    Search {
        /// Keyword to look for.
        keyword: String,
        /// Maximum number of results.
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// User id (defaults to storage.default_user_id).
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Delete an entry.
    Delete {
        /// Entry id.
        id: String,
    },
    /// Embed entries that have no embedding yet.
    Reindex {
        /// Maximum number of entries to embed.
        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,
        /// User id (defaults to storage.default_user_id).
        #[arg(short, long)]
        user: Option<String>,
    },
}

pub async fn run(config: ConfigHandle, action: JournalAction, format: OutputFormat) -> SouloResult<()> {
    let registry = super::init_registry(&config).await?;
    let journal = registry.journal.clone();

    match action {
        JournalAction::Add { text, user } => {
            let user_id = super::resolve_user(&config, user).await;
            let text = match text {
                Some(t) => t,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let processed = journal.create_text_entry(&text, &user_id).await?;
            print_processed(&processed, format);
        }
        JournalAction::Record { path, user } => {
            let user_id = super::resolve_user(&config, user).await;
            let path = Path::new(&path);
            let mime_type = mime_for_path(path)?;
            let audio = std::fs::read(path)?;

            let pb = spinner(format, &format!("Transcribing {}...", super::format_bytes(audio.len() as u64)));
            let result = journal.process_recording(&audio, mime_type, &user_id).await;
            pb.finish_and_clear();
            print_processed(&result?, format);
        }
        JournalAction::List { limit, page, days, user } => {
            let user_id = super::resolve_user(&config, user).await;
            let offset = (page.max(1) - 1) * limit;
            let window = days.map(|d| {
                let now = Utc::now();
                DateWindow::new(now - Duration::days(d.max(0)), now)
            });
            let entries = journal.list_entries(&user_id, offset, limit, window.as_ref()).await?;
            print_entries(&entries, format);
        }
        JournalAction::Search { keyword, limit, user } => {
            let user_id = super::resolve_user(&config, user).await;
            let entries = journal.search_entries(&user_id, &keyword, limit).await?;
            print_entries(&entries, format);
        }
        JournalAction::Delete { id } => {
            journal.delete_entry(&id).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({"deleted": id})),
                OutputFormat::Text => {
                    println!("  {} Deleted entry {}.", style("OK").green().bold(), id);
                }
            }
        }
        JournalAction::Reindex { limit, user } => {
            let user_id = super::resolve_user(&config, user).await;

            let pb = ProgressBar::new(0);
            if format == OutputFormat::Text {
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("  [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
            } else {
                pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
            }

            let mut rx = registry.event_bus().subscribe();
            let pb_clone = pb.clone();
            let listener = tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    if let AppEvent::ReindexProgress { processed, failed, total } = event {
                        pb_clone.set_length(total as u64);
                        pb_clone.set_position((processed + failed) as u64);
                        if failed > 0 {
                            pb_clone.set_message(format!("({failed} failed)"));
                        }
                    }
                }
            });

            let result = journal.reindex_missing_embeddings(&user_id, limit).await;
            listener.abort();
            pb.finish_and_clear();
            let report = result?;

            match format {
                OutputFormat::Json => super::print_json(&report),
                OutputFormat::Text => {
                    if report.total == 0 {
                        println!("  Every entry already has an embedding.");
                    } else {
                        println!(
                            "  {} Embedded {}/{} entries.",
                            style("OK").green().bold(),
                            report.processed,
                            report.total
                        );
                        if report.failed > 0 {
                            println!(
                                "  {} {} entr{} failed; run reindex again to retry.",
                                style("WARN").yellow().bold(),
                                report.failed,
                                if report.failed == 1 { "y" } else { "ies" }
                            );
                        }
                    }
                }
            }
        }
    }

    registry.shutdown_all()
}

/// Audio mime type from a file extension.
pub fn mime_for_path(path: &Path) -> SouloResult<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "wav" => Ok("audio/wav"),
        "mp3" => Ok("audio/mpeg"),
        "m4a" | "mp4" => Ok("audio/mp4"),
        "webm" => Ok("audio/webm"),
        "ogg" | "oga" => Ok("audio/ogg"),
        "flac" => Ok("audio/flac"),
        _ => Err(SouloError::InvalidInput(format!(
            "unsupported audio file: {}",
            path.display()
        ))),
    }
}

fn spinner(format: OutputFormat, message: &str) -> ProgressBar {
    if format == OutputFormat::Json {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn print_processed(processed: &ProcessedEntry, format: OutputFormat) {
    match format {
        OutputFormat::Json => super::print_json(processed),
        OutputFormat::Text => {
            let entry = &processed.entry;
            println!("  {} Saved entry {}.", style("OK").green().bold(), entry.id);
            println!();
            println!("  {}", super::truncate(&entry.content, 200));
            println!();
            println!("  Sentiment: {}", entry.sentiment_label());
            let emotions = entry
                .top_emotions(3)
                .into_iter()
                .map(|(name, _)| name.to_string())
                .collect::<Vec<_>>();
            if !emotions.is_empty() {
                println!("  Emotions:  {}", emotions.join(", "));
            }
            if !entry.themes.is_empty() {
                println!("  Themes:    {}", entry.themes.join(", "));
            }
            for step in &processed.skipped_steps {
                println!(
                    "  {} {} skipped: {}",
                    style("WARN").yellow().bold(),
                    step.step,
                    step.error
                );
            }
        }
    }
}

fn print_entries(entries: &[JournalEntry], format: OutputFormat) {
    match format {
        OutputFormat::Json => super::print_json(&entries),
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("  No entries found.");
                return;
            }
            let mut table = super::new_table();
            table.set_header(vec!["Date", "Entry", "Sentiment", "Themes", "ID"]);
            for entry in entries {
                table.add_row(vec![
                    entry.created_at.format("%Y-%m-%d %H:%M").to_string(),
                    super::truncate(entry.text(), 60),
                    entry.sentiment_label().to_string(),
                    super::truncate(&entry.themes.join(", "), 30),
                    entry.id.clone(),
                ]);
            }
            println!("{table}");
            println!("  {} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("note.WAV")).unwrap(), "audio/wav");
        assert_eq!(mime_for_path(Path::new("memo.m4a")).unwrap(), "audio/mp4");
        assert_eq!(mime_for_path(Path::new("a/b/c.webm")).unwrap(), "audio/webm");
        assert!(matches!(
            mime_for_path(Path::new("notes.txt")),
            Err(SouloError::InvalidInput(_))
        ));
        assert!(mime_for_path(Path::new("noext")).is_err());
    }
}
