//! Chat thread commands.

use clap::Subcommand;
use console::style;

use soulo_core::config::ConfigHandle;
use soulo_core::error::SouloResult;
use soulo_services::chat::DEFAULT_THREAD_LIMIT;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ThreadsAction {
    /// List chat threads, most recently active first.
    List {
        /// Number of threads to show.
        #[arg(short = 'n', long, default_value_t = DEFAULT_THREAD_LIMIT)]
        limit: usize,
        /// User id (defaults to storage.default_user_id).
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Start an empty thread.
    New {
        /// Thread title.
        title: Option<String>,
        /// User id (defaults to storage.default_user_id).
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Show a thread's messages.
    Show {
        /// Thread id.
        id: String,
        /// Number of most recent messages to show.
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        /// User id (defaults to storage.default_user_id).
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Rename a thread.
    Rename {
        /// Thread id.
        id: String,
        /// New title.
        title: String,
    },
    /// Delete a thread and its messages.
    Delete {
        /// Thread id.
        id: String,
    },
}

pub async fn run(config: ConfigHandle, action: ThreadsAction, format: OutputFormat) -> SouloResult<()> {
    let registry = super::init_registry(&config).await?;
    let chat = registry.chat.clone();

    match action {
        ThreadsAction::List { limit, user } => {
            let user_id = super::resolve_user(&config, user).await;
            let threads = chat.list_threads(&user_id, limit).await?;

            match format {
                OutputFormat::Json => super::print_json(&threads),
                OutputFormat::Text => {
                    if threads.is_empty() {
                        println!("  No threads yet. Start one with `soulo ask --new-thread`.");
                    } else {
                        let mut table = super::new_table();
                        table.set_header(vec!["Title", "Last active", "ID"]);
                        for thread in &threads {
                            table.add_row(vec![
                                super::truncate(&thread.title, 50),
                                thread.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                                thread.id.clone(),
                            ]);
                        }
                        println!("{table}");
                    }
                }
            }
        }
        ThreadsAction::New { title, user } => {
            let user_id = super::resolve_user(&config, user).await;
            let thread = chat.create_thread(&user_id, title.as_deref()).await?;
            match format {
                OutputFormat::Json => super::print_json(&thread),
                OutputFormat::Text => {
                    println!(
                        "  {} Created thread \"{}\" ({}).",
                        style("OK").green().bold(),
                        thread.title,
                        thread.id
                    );
                }
            }
        }
        ThreadsAction::Show { id, limit, user } => {
            let user_id = super::resolve_user(&config, user).await;
            let thread = chat.get_user_thread(&id, &user_id).await?;
            let messages = chat.messages(&thread.id, limit).await?;

            match format {
                OutputFormat::Json => {
                    super::print_json(&serde_json::json!({
                        "thread": thread,
                        "messages": messages,
                    }));
                }
                OutputFormat::Text => {
                    println!("{}", style(&thread.title).bold().underlined());
                    println!(
                        "  created {}  |  {} message(s)\n",
                        thread.created_at.format("%Y-%m-%d %H:%M"),
                        messages.len()
                    );
                    for message in &messages {
                        let who = if message.is_user() {
                            style("you").cyan().bold()
                        } else {
                            style("soulo").magenta().bold()
                        };
                        println!(
                            "  {} {}",
                            who,
                            style(message.created_at.format("%H:%M")).dim()
                        );
                        for line in message.content.lines() {
                            println!("    {line}");
                        }
                        println!();
                    }
                }
            }
        }
        ThreadsAction::Rename { id, title } => {
            chat.rename_thread(&id, &title).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({"renamed": id})),
                OutputFormat::Text => {
                    println!("  {} Thread renamed.", style("OK").green().bold());
                }
            }
        }
        ThreadsAction::Delete { id } => {
            chat.delete_thread(&id).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({"deleted": id})),
                OutputFormat::Text => {
                    println!("  {} Deleted thread {}.", style("OK").green().bold(), id);
                }
            }
        }
    }

    registry.shutdown_all()
}
