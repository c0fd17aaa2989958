//! Serve command - run the edge-function HTTP server in the foreground.

use std::sync::Arc;

use console::style;
use tokio::sync::{broadcast, watch};

use soulo_core::config::ConfigHandle;
use soulo_core::error::{SouloError, SouloResult};
use soulo_services::AppEvent;

pub async fn run(config: ConfigHandle, port: Option<u16>, bind: Option<String>) -> SouloResult<()> {
    {
        let mut cfg = config.write().await;
        if let Some(port) = port {
            cfg.server.port = port;
        }
        if let Some(bind) = bind {
            cfg.server.bind_address = bind;
        }
    }

    let registry = Arc::new(super::init_registry(&config).await?);
    let snapshot = config.snapshot().await;
    let mut rx = registry.event_bus().subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server = {
        let registry = registry.clone();
        tokio::spawn(async move { soulo_server::serve(registry, &snapshot, shutdown_rx).await })
    };

    let cfg = config.read().await;
    println!(
        "  {} Serving on http://{}:{} ({} storage, auth {}). Ctrl+C to stop.",
        style("OK").green().bold(),
        cfg.server.bind_address,
        cfg.server.port,
        cfg.storage.mode.as_str(),
        if cfg.server.auth_token.is_empty() { "off" } else { "on" }
    );
    println!();
    drop(cfg);

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => print_event(&ev),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        println!(
                            "  {} Missed {n} events (slow consumer)",
                            style("WARN").yellow()
                        );
                    }
                    Err(_) => break,
                }
            }
            joined = &mut server => {
                registry.shutdown_all()?;
                return joined.map_err(|e| SouloError::Internal(format!("server task failed: {e}")))?;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n  Shutting down...");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let served = server
        .await
        .map_err(|e| SouloError::Internal(format!("server task failed: {e}")))?;
    registry.shutdown_all()?;
    served
}

fn print_event(event: &AppEvent) {
    match event {
        AppEvent::ChatAnswered { complexity, route_used, entries, elapsed_ms, .. } => {
            println!(
                "  {} {} question, route {}, {} entries, {}ms",
                style("[chat]").cyan(),
                complexity,
                route_used.as_deref().unwrap_or("none"),
                entries,
                elapsed_ms
            );
        }
        AppEvent::ChatFailed { error_code } => {
            println!("  {} failed: {}", style("[chat]").red(), error_code);
        }
        AppEvent::EntryCreated { entry_id, has_embedding, .. } => {
            println!(
                "  {} stored {}{}",
                style("[entry]").cyan(),
                entry_id,
                if *has_embedding { "" } else { " (no embedding)" }
            );
        }
        AppEvent::EntryStepSkipped { step, error } => {
            println!("  {} {} skipped: {}", style("[entry]").yellow(), step, error);
        }
        AppEvent::TranscriptionFailed { error } => {
            println!("  {} transcription failed: {}", style("[audio]").red(), error);
        }
        _ => {}
    }
}
