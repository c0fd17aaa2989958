//! CLI command implementations.

pub mod ask;
pub mod journal;
pub mod threads;
pub mod reminders;
pub mod serve;
pub mod config;
pub mod status;
pub mod db;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use soulo_core::config::ConfigHandle;
use soulo_core::error::SouloResult;
use soulo_services::ServiceRegistry;

/// Build the registry from config and initialize every service.
pub async fn init_registry(config: &ConfigHandle) -> SouloResult<ServiceRegistry> {
    let registry = ServiceRegistry::from_config(config.snapshot().await)?;
    registry.init_all()?;
    Ok(registry)
}

/// The given user id, or the configured default.
pub async fn resolve_user(config: &ConfigHandle, user: Option<String>) -> String {
    match user.filter(|u| !u.trim().is_empty()) {
        Some(u) => u,
        None => config.read().await.storage.default_user_id.clone(),
    }
}

/// Pretty-print a value as JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

/// A table with the CLI's standard styling.
pub fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Truncate to `max_chars` characters on a single line, appending an
/// ellipsis if truncated.
pub fn truncate(s: &str, max_chars: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else if max_chars > 3 {
        let cut: String = flat.chars().take(max_chars - 3).collect();
        format!("{cut}...")
    } else {
        flat.chars().take(max_chars).collect()
    }
}

/// Mask a secret for display, keeping its last four characters.
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return "(not set)".to_string();
    }
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line one\nline two", 40), "line one line two");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(not set)");
        assert_eq!(mask_secret("abc"), "****");
        assert_eq!(mask_secret("sk-123456789"), "****6789");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
