//! Status command - show configuration, storage and service status.

use console::style;

use soulo_core::config::{ConfigHandle, StorageMode};
use soulo_core::error::SouloResult;
use crate::OutputFormat;

/// Run the status command.
pub async fn run(config: ConfigHandle, format: OutputFormat) -> SouloResult<()> {
    let cfg = config.snapshot().await;
    let db_path = cfg.effective_db_path()?;

    // A registry that fails to build is reported, not returned.
    let registry = super::init_registry(&config).await;

    let (ping, stats, health) = match &registry {
        Ok(registry) => {
            let ping = match &registry.backend {
                Some(backend) => Some(backend.ping().await.map_err(|e| e.to_string())),
                None => None,
            };
            let stats = registry.database.stats().ok();
            (ping, stats, registry.health_check())
        }
        Err(_) => (None, None, Vec::new()),
    };
    let file_size = std::fs::metadata(&db_path).ok().map(|m| m.len());

    match format {
        OutputFormat::Json => {
            let mut json = serde_json::json!({
                "version": soulo_core::constants::APP_VERSION,
                "storage_mode": cfg.storage.mode.as_str(),
                "default_user_id": cfg.storage.default_user_id,
                "backend_configured": cfg.is_backend_configured(),
                "llm_configured": cfg.is_llm_configured(),
                "speech_configured": !cfg.effective_speech_key().is_empty(),
                "sentiment_configured": !cfg.sentiment.api_key.is_empty(),
                "server": {
                    "address": format!("{}:{}", cfg.server.bind_address, cfg.server.port),
                    "auth": !cfg.server.auth_token.is_empty(),
                },
            });
            if let Err(e) = &registry {
                json["error"] = serde_json::json!(e.to_string());
                json["errorCode"] = serde_json::json!(e.error_code());
            }
            if let Some(ping) = &ping {
                json["backend"] = match ping {
                    Ok(latency) => serde_json::json!({
                        "reachable": true,
                        "latency_ms": latency.as_millis() as u64,
                    }),
                    Err(e) => serde_json::json!({"reachable": false, "error": e}),
                };
            }
            if let Some(stats) = &stats {
                json["local_database"] = serde_json::json!({
                    "path": db_path.display().to_string(),
                    "file_size_bytes": file_size,
                    "tables": stats,
                });
            }
            json["services"] = health
                .iter()
                .map(|(name, state, healthy)| {
                    serde_json::json!({"name": name, "state": state.to_string(), "healthy": healthy})
                })
                .collect();
            super::print_json(&json);
        }
        OutputFormat::Text => {
            println!("{}", style("Configuration").bold().underlined());
            println!("  Version:   {}", soulo_core::constants::APP_VERSION);
            println!("  Storage:   {}", cfg.storage.mode.as_str());
            println!("  User:      {}", cfg.storage.default_user_id);
            println!("  LLM:       {}", configured(cfg.is_llm_configured()));
            println!("  Speech:    {}", configured(!cfg.effective_speech_key().is_empty()));
            println!("  Sentiment: {}", configured(!cfg.sentiment.api_key.is_empty()));
            println!(
                "  Server:    {}:{} (auth {})",
                cfg.server.bind_address,
                cfg.server.port,
                if cfg.server.auth_token.is_empty() { "off" } else { "on" }
            );

            if let Err(e) = &registry {
                println!();
                println!("  {} {}", style("ERROR").red().bold(), e);
            }

            if cfg.storage.mode == StorageMode::Remote {
                println!();
                println!("{}", style("Backend").bold().underlined());
                println!("  URL:       {}", if cfg.backend.url.is_empty() { "(not set)" } else { cfg.backend.url.as_str() });
                match &ping {
                    Some(Ok(latency)) => println!(
                        "  Status:    {} ({}ms)",
                        style("reachable").green(),
                        latency.as_millis()
                    ),
                    Some(Err(e)) => println!("  Status:    {} ({e})", style("unreachable").red()),
                    None => println!("  Status:    {}", style("not configured").yellow()),
                }
            }

            if let Some(stats) = &stats {
                println!();
                println!("{}", style("Local Database").bold().underlined());
                println!("  Path:      {}", db_path.display());
                println!("  Entries:   {} ({} embedded)", stats.journal_entries, stats.embedded_entries);
                println!("  Threads:   {}", stats.chat_threads);
                println!("  Messages:  {}", stats.chat_messages);
                println!("  Reminders: {}", stats.reminders);
                if let Some(size) = file_size {
                    println!("  Disk usage: {}", super::format_bytes(size));
                }
            }

            if !health.is_empty() {
                println!();
                println!("{}", style("Services").bold().underlined());
                for (name, state, healthy) in &health {
                    let state = if *healthy {
                        style(state.to_string()).green()
                    } else {
                        style(state.to_string()).red()
                    };
                    println!("  {name:<10} {state}");
                }
            }
        }
    }

    if let Ok(registry) = registry {
        registry.shutdown_all()?;
    }
    Ok(())
}

fn configured(value: bool) -> console::StyledObject<&'static str> {
    if value {
        style("configured").green()
    } else {
        style("not configured").yellow()
    }
}
