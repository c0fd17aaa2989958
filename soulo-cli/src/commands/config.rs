//! Configuration commands.

use std::path::PathBuf;

use clap::Subcommand;
use console::style;

use soulo_core::config::{AppConfig, ConfigHandle, StorageMode};
use soulo_core::error::{SouloError, SouloResult};
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration with secrets masked.
    Show,
    /// Write a default configuration file with a fresh server token.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
        /// Keep journal data in the local database instead of the backend.
        #[arg(long)]
        local: bool,
    },
    /// Print the configuration file path.
    Path,
}

pub async fn run(
    config: ConfigHandle,
    config_path: PathBuf,
    action: ConfigAction,
    format: OutputFormat,
) -> SouloResult<()> {
    match action {
        ConfigAction::Show => {
            let cfg = masked(&config.snapshot().await);
            match format {
                OutputFormat::Json => super::print_json(&cfg),
                OutputFormat::Text => {
                    let text = toml::to_string_pretty(&cfg)
                        .map_err(|e| SouloError::Config(format!("failed to render config: {e}")))?;
                    println!("{}", style(config_path.display()).dim());
                    println!();
                    print!("{text}");
                }
            }
        }
        ConfigAction::Init { force, local } => {
            if config_path.exists() && !force {
                return Err(SouloError::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                )));
            }
            let mut cfg = AppConfig::default();
            if local {
                cfg.storage.mode = StorageMode::Local;
            }
            cfg.server.auth_token = soulo_server::generate_token();
            cfg.save_to_file(&config_path)?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({
                        "path": config_path.display().to_string(),
                        "storage_mode": cfg.storage.mode.as_str(),
                    }));
                }
                OutputFormat::Text => {
                    println!(
                        "  {} Wrote {}",
                        style("OK").green().bold(),
                        config_path.display()
                    );
                    println!("  Storage mode: {}", cfg.storage.mode.as_str());
                    println!("  Server token: {}", super::mask_secret(&cfg.server.auth_token));
                    println!();
                    println!("  Next, set llm.api_key{}.", if local { "" } else { ", backend.url and backend.anon_key" });
                }
            }
        }
        ConfigAction::Path => match format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"path": config_path.display().to_string()}));
            }
            OutputFormat::Text => println!("{}", config_path.display()),
        },
    }
    Ok(())
}

/// A copy of the config with every secret masked.
pub fn masked(config: &AppConfig) -> AppConfig {
    let mut cfg = config.clone();
    for secret in [
        &mut cfg.backend.anon_key,
        &mut cfg.backend.service_key,
        &mut cfg.llm.api_key,
        &mut cfg.speech.api_key,
        &mut cfg.sentiment.api_key,
        &mut cfg.server.auth_token,
    ] {
        *secret = super::mask_secret(secret);
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_hides_secrets() {
        let mut config = AppConfig::default();
        config.llm.api_key = "sk-abcdefgh1234".into();
        config.server.auth_token = "token-xyz9".into();
        config.backend.url = "https://demo.example.co".into();

        let cfg = masked(&config);
        assert_eq!(cfg.llm.api_key, "****1234");
        assert_eq!(cfg.server.auth_token, "****xyz9");
        assert_eq!(cfg.speech.api_key, "(not set)");
        assert_eq!(cfg.backend.url, "https://demo.example.co");
    }
}
