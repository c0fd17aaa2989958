//! OS-specific directories and host identity.
//!
//! `SOULO_HOME`, when set, replaces both the data and the config directory,
//! which keeps server deployments and scripted runs self-contained.

use std::path::{Path, PathBuf};

use crate::constants::APP_NAME;
use crate::error::{SouloError, SouloResult};

/// Environment variable that relocates every Soulo directory.
pub const HOME_ENV: &str = "SOULO_HOME";

/// Directory lookup for the current machine.
pub struct Platform;

impl Platform {
    /// Application data directory (database, logs).
    ///
    /// - Windows: `%APPDATA%/Soulo`
    /// - macOS: `~/Library/Application Support/Soulo`
    /// - Linux: `~/.local/share/Soulo`
    pub fn data_dir() -> SouloResult<PathBuf> {
        Self::resolve(std::env::var_os(HOME_ENV).as_deref().map(Path::new), dirs::data_dir(), "data")
    }

    /// Configuration directory (`config.toml`).
    ///
    /// - Windows: `%APPDATA%/Soulo`
    /// - macOS: `~/Library/Application Support/Soulo`
    /// - Linux: `~/.config/Soulo`
    pub fn config_dir() -> SouloResult<PathBuf> {
        Self::resolve(std::env::var_os(HOME_ENV).as_deref().map(Path::new), dirs::config_dir(), "config")
    }

    fn resolve(home: Option<&Path>, base: Option<PathBuf>, kind: &str) -> SouloResult<PathBuf> {
        if let Some(home) = home.filter(|h| !h.as_os_str().is_empty()) {
            return Ok(home.to_path_buf());
        }
        base.map(|b| b.join(APP_NAME))
            .ok_or_else(|| SouloError::Config(format!("could not determine {kind} directory; set {HOME_ENV}")))
    }

    /// The system hostname, used to tag log files.
    pub fn hostname() -> String {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "soulo-host".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_override_wins() {
        let dir = Platform::resolve(Some(Path::new("/srv/soulo")), Some(PathBuf::from("/home/u/.config")), "config").unwrap();
        assert_eq!(dir, PathBuf::from("/srv/soulo"));
    }

    #[test]
    fn test_base_dir_gets_app_name() {
        let dir = Platform::resolve(Some(Path::new("")), Some(PathBuf::from("/home/u/.local/share")), "data").unwrap();
        assert_eq!(dir, PathBuf::from("/home/u/.local/share").join(APP_NAME));
    }

    #[test]
    fn test_missing_base_dir_is_config_error() {
        let err = Platform::resolve(None, None, "data").unwrap_err();
        assert_eq!(err.error_code(), "config_error");
        assert!(err.to_string().contains(HOME_ENV));
    }

    #[test]
    fn test_hostname_not_empty() {
        assert!(!Platform::hostname().is_empty());
    }
}
