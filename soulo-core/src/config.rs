//! `config.toml` model: backend and vendor credentials, storage mode,
//! retrieval tiers and the edge-function server. Secrets can come from
//! `SOULO_*` environment variables instead of the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{SouloError, SouloResult};
use crate::platform::Platform;

/// Top-level application configuration. Every section is optional in the
/// TOML file; missing keys take the section's `Default`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub llm: LlmConfig,
    pub speech: SpeechConfig,
    pub sentiment: SentimentConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
}

/// Managed Postgres backend (PostgREST and RPC).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Project URL, e.g. "https://abc.supabase.co".
    pub url: String,
    /// Public key, sent as `apikey`.
    pub anon_key: String,
    /// Used as the bearer token when set.
    pub service_key: String,
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            service_key: String::new(),
            timeout_ms: crate::constants::DEFAULT_API_TIMEOUT_MS,
        }
    }
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const LLM_TIMEOUT_MS: u64 = 60_000;

/// Chat completions and embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    /// Model used for answers, SQL generation and entry analysis.
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: String::new(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.7,
            max_tokens: 1_000,
            timeout_ms: LLM_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub base_url: String,
    /// Falls back to `llm.api_key` when empty.
    pub api_key: String,
    pub model: String,
    /// Total transcription attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub base_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            max_attempts: 3,
            base_delay_ms: 1_000,
            timeout_ms: LLM_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            base_url: "https://language.googleapis.com/v1".to_string(),
            api_key: String::new(),
            timeout_ms: crate::constants::DEFAULT_API_TIMEOUT_MS,
        }
    }
}

/// Where journal data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// The managed backend.
    Remote,
    /// The local SQLite database only.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: StorageMode,
    /// User id for requests that do not carry one (local mode, CLI).
    pub default_user_id: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Remote,
            default_user_id: "local-user".to_string(),
        }
    }
}

/// Local SQLite store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Empty means `<data dir>/soulo.db`.
    pub path: String,
    pub wal_mode: bool,
    pub pool_size: u32,
    pub integrity_check_on_startup: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            wal_mode: true,
            pool_size: 4,
            integrity_check_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// A level or a full filter directive; `SOULO_LOG` wins when set.
    pub level: String,
    /// Empty means `<data dir>/logs`.
    pub directory: String,
    /// JSON lines in the log file instead of plain text.
    pub json_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: String::new(),
            json_output: false,
        }
    }
}

/// Per-complexity retrieval limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierConfig {
    /// Minimum cosine similarity for vector matches.
    pub similarity_threshold: f32,
    /// Maximum entries handed to the answer prompt.
    pub max_entries: usize,
    /// Prior thread messages included in the prompt.
    pub history_messages: usize,
    /// Processing-time budget for one route, in milliseconds.
    pub budget_ms: u64,
    /// Outbound searches in flight at once.
    pub max_concurrency: usize,
}

impl TierConfig {
    const fn new(similarity_threshold: f32, max_entries: usize, history_messages: usize, budget_ms: u64, max_concurrency: usize) -> Self {
        Self { similarity_threshold, max_entries, history_messages, budget_ms, max_concurrency }
    }
}

/// Retrieval pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub simple: TierConfig,
    pub moderate: TierConfig,
    pub complex: TierConfig,
    /// Ceiling for exhaustive questions ("every time I ...").
    pub global_entry_ceiling: usize,
    /// Row limit appended to generated SQL without one.
    pub sql_row_limit: usize,
    /// Entries used by the last-resort "recent entries" route.
    pub recent_fallback_count: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            simple: TierConfig::new(0.5, 5, 4, 8_000, 1),
            moderate: TierConfig::new(0.4, 10, 6, 15_000, 2),
            complex: TierConfig::new(0.3, 20, 10, 25_000, 3),
            global_entry_ceiling: 50,
            sql_row_limit: 100,
            recent_fallback_count: 5,
        }
    }
}

/// Edge-function HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Bearer token required on every request. Empty disables auth.
    pub auth_token: String,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8787,
            auth_token: String::new(),
            // base64 inflates the 25 MB audio limit by 4/3
            max_body_bytes: 36 * 1024 * 1024,
        }
    }
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Remote => "remote",
            StorageMode::Local => "local",
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = SouloError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(StorageMode::Remote),
            "local" => Ok(StorageMode::Local),
            other => Err(SouloError::Config(format!("unknown storage mode: {other}"))),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> SouloResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Write as pretty TOML, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> SouloResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SouloError::Config(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// `<config dir>/config.toml`.
    pub fn default_config_path() -> SouloResult<PathBuf> {
        Ok(Platform::config_dir()?.join("config.toml"))
    }

    /// Overlay secrets and endpoints from `SOULO_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup (environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SOULO_BACKEND_URL") {
            self.backend.url = Self::sanitize_url(&v);
        }
        if let Some(v) = get("SOULO_BACKEND_KEY") {
            self.backend.anon_key = v;
        }
        if let Some(v) = get("SOULO_SERVICE_KEY") {
            self.backend.service_key = v;
        }
        if let Some(v) = get("SOULO_LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("SOULO_SPEECH_API_KEY") {
            self.speech.api_key = v;
        }
        if let Some(v) = get("SOULO_SENTIMENT_API_KEY") {
            self.sentiment.api_key = v;
        }
        if let Some(v) = get("SOULO_SERVER_TOKEN") {
            self.server.auth_token = v;
        }
        if let Some(v) = get("SOULO_STORAGE_MODE") {
            match v.parse() {
                Ok(mode) => self.storage.mode = mode,
                Err(e) => tracing::warn!("ignoring SOULO_STORAGE_MODE: {e}"),
            }
        }
    }

    pub fn effective_db_path(&self) -> SouloResult<PathBuf> {
        Self::or_data_dir(&self.database.path, "soulo.db")
    }

    pub fn effective_log_dir(&self) -> SouloResult<PathBuf> {
        Self::or_data_dir(&self.logging.directory, "logs")
    }

    fn or_data_dir(configured: &str, default_name: &str) -> SouloResult<PathBuf> {
        match configured.trim() {
            "" => Ok(Platform::data_dir()?.join(default_name)),
            path => Ok(PathBuf::from(path)),
        }
    }

    /// Whether the managed backend connection is configured.
    pub fn is_backend_configured(&self) -> bool {
        !self.backend.url.is_empty()
            && (!self.backend.anon_key.is_empty() || !self.backend.service_key.is_empty())
    }

    /// Whether the language model API is configured.
    pub fn is_llm_configured(&self) -> bool {
        !self.llm.api_key.is_empty()
    }

    /// Speech API key, falling back to the LLM key (same vendor by default).
    pub fn effective_speech_key(&self) -> &str {
        if self.speech.api_key.is_empty() {
            &self.llm.api_key
        } else {
            &self.speech.api_key
        }
    }

    /// Validate that everything the selected storage mode needs is present.
    pub fn validate(&self) -> SouloResult<()> {
        if self.storage.mode == StorageMode::Remote && !self.is_backend_configured() {
            return Err(SouloError::MissingConfig(
                "backend.url and backend.anon_key (or SOULO_BACKEND_URL / SOULO_BACKEND_KEY)".into(),
            ));
        }
        for (name, tier) in [
            ("simple", &self.retrieval.simple),
            ("moderate", &self.retrieval.moderate),
            ("complex", &self.retrieval.complex),
        ] {
            if !(0.0..=1.0).contains(&tier.similarity_threshold) {
                return Err(SouloError::Config(format!(
                    "retrieval.{name}.similarity_threshold must be within 0..=1"
                )));
            }
            if tier.max_entries == 0 || tier.max_concurrency == 0 {
                return Err(SouloError::Config(format!(
                    "retrieval.{name}: max_entries and max_concurrency must be positive"
                )));
            }
        }
        Ok(())
    }

    /// Strip quotes and trailing slashes; add `https://` (or `http://` for
    /// loopback hosts) when no scheme is given.
    pub fn sanitize_url(address: &str) -> String {
        let url = address.trim().trim_matches('"').trim().trim_end_matches('/');
        if url.is_empty() || url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        let scheme = if url.starts_with("localhost") || url.starts_with("127.0.0.1") { "http" } else { "https" };
        format!("{scheme}://{url}")
    }
}

/// Shared, mutable view of the configuration. The CLI applies flag
/// overrides through [`ConfigHandle::write`] before services start.
#[derive(Clone)]
pub struct ConfigHandle(Arc<RwLock<AppConfig>>);

impl ConfigHandle {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, AppConfig> {
        self.0.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, AppConfig> {
        self.0.write().await
    }

    pub async fn snapshot(&self) -> AppConfig {
        self.0.read().await.clone()
    }
}
