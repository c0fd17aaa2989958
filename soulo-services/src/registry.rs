//! Service registry for dependency injection and lifecycle management.
//!
//! The registry builds the journal store and vendor clients from the
//! configuration, constructs the services around them, initializes them in
//! order and shuts them down in reverse.

use std::sync::Arc;

use tracing::{error, info, warn};

use soulo_api::{BackendClient, LlmClient, SentimentClient, SpeechClient};
use soulo_core::config::{AppConfig, ConfigHandle, StorageMode};
use soulo_core::error::{SouloError, SouloResult};
use soulo_models::Database;

use crate::chat::ChatService;
use crate::event_bus::EventBus;
use crate::journal::JournalService;
use crate::rag::pipeline::RagPipeline;
use crate::reminder::ReminderService;
use crate::service::{Service, ServiceState};
use crate::store::{JournalStore, LocalStore, RemoteStore};
use crate::traits::{LanguageModel, SentimentAnalyzer, Transcriber, Unconfigured};

/// Infrastructure the services are built on.
pub struct Dependencies {
    /// Local database (reminders, and journal data in local mode).
    pub database: Database,
    /// Where journal entries, threads and messages live.
    pub store: Arc<dyn JournalStore>,
    pub llm: Arc<dyn LanguageModel>,
    pub transcriber: Arc<dyn Transcriber>,
    /// `None` when no sentiment key is configured.
    pub sentiment: Option<Arc<dyn SentimentAnalyzer>>,
    /// Managed backend client, present in remote mode.
    pub backend: Option<BackendClient>,
}

impl Dependencies {
    /// Open the local database and build the store and vendor clients.
    ///
    /// Missing vendor keys do not fail here; the affected calls report the
    /// setting to fill in when they are made.
    pub fn from_config(config: &AppConfig) -> SouloResult<Self> {
        config.validate()?;

        let db_path = config.effective_db_path()?;
        let database = Database::init(&db_path, &config.database)?;

        let (store, backend): (Arc<dyn JournalStore>, Option<BackendClient>) = match config.storage.mode {
            StorageMode::Remote => {
                let client = BackendClient::new(&config.backend)?;
                (Arc::new(RemoteStore::new(client.clone())), Some(client))
            }
            StorageMode::Local => (Arc::new(LocalStore::new(database.clone())), None),
        };

        let llm: Arc<dyn LanguageModel> = if config.is_llm_configured() {
            Arc::new(LlmClient::new(&config.llm)?)
        } else {
            warn!("llm.api_key is not set; answers and embeddings are unavailable");
            Arc::new(Unconfigured { setting: "llm.api_key" })
        };

        let speech_key = config.effective_speech_key();
        let transcriber: Arc<dyn Transcriber> = if speech_key.is_empty() {
            Arc::new(Unconfigured { setting: "speech.api_key" })
        } else {
            Arc::new(SpeechClient::new(&config.speech, speech_key)?)
        };

        let sentiment: Option<Arc<dyn SentimentAnalyzer>> = if config.sentiment.api_key.is_empty() {
            None
        } else {
            Some(Arc::new(SentimentClient::new(&config.sentiment)?))
        };

        Ok(Self {
            database,
            store,
            llm,
            transcriber,
            sentiment,
            backend,
        })
    }
}

/// Central service registry that manages all application services.
///
/// Holds shared references to the infrastructure (config, database, store,
/// vendor clients, event bus) and the concrete services, and manages their
/// lifecycle in dependency order.
pub struct ServiceRegistry {
    /// Application configuration.
    pub config: ConfigHandle,
    /// Local database connection pool.
    pub database: Database,
    /// Journal store in use.
    pub store: Arc<dyn JournalStore>,
    pub llm: Arc<dyn LanguageModel>,
    pub transcriber: Arc<dyn Transcriber>,
    pub sentiment: Option<Arc<dyn SentimentAnalyzer>>,
    pub backend: Option<BackendClient>,
    /// Application-level event bus.
    pub event_bus: EventBus,
    pub chat: Arc<ChatService>,
    pub journal: Arc<JournalService>,
    pub reminders: Arc<ReminderService>,
    pub rag: Arc<RagPipeline>,
    /// Registered services in initialization order.
    services: Vec<(String, Arc<dyn Service>)>,
}

impl ServiceRegistry {
    /// Create the registry and its services. Nothing is registered for
    /// lifecycle management until [`register_all`](Self::register_all).
    pub fn new(config: AppConfig, deps: Dependencies) -> Self {
        let event_bus = EventBus::new(256);

        let chat = Arc::new(ChatService::new(deps.store.clone(), event_bus.clone()));
        let journal = Arc::new(JournalService::new(
            deps.store.clone(),
            deps.llm.clone(),
            deps.transcriber.clone(),
            deps.sentiment.clone(),
            event_bus.clone(),
        ));
        let reminders = Arc::new(ReminderService::new(deps.database.clone(), event_bus.clone()));
        let rag = Arc::new(RagPipeline::new(
            deps.store.clone(),
            deps.llm.clone(),
            chat.clone(),
            config.retrieval.clone(),
            &config.storage.default_user_id,
            event_bus.clone(),
        ));

        Self {
            config: ConfigHandle::new(config),
            database: deps.database,
            store: deps.store,
            llm: deps.llm,
            transcriber: deps.transcriber,
            sentiment: deps.sentiment,
            backend: deps.backend,
            event_bus,
            chat,
            journal,
            reminders,
            rag,
            services: Vec::new(),
        }
    }

    /// Build everything from configuration and register the default services.
    pub fn from_config(config: AppConfig) -> SouloResult<Self> {
        let deps = Dependencies::from_config(&config)?;
        let mut registry = Self::new(config, deps);
        registry.register_all();
        Ok(registry)
    }

    /// Register a service. Services are initialized in registration order.
    pub fn register(&mut self, service: Arc<dyn Service>) {
        let name = service.name().to_string();
        info!("registered service: {name}");
        self.services.push((name, service));
    }

    /// Register all default services in the correct dependency order.
    ///
    /// Initialization order:
    /// 1. Chat (store, event_bus)
    /// 2. Journal (store, vendor clients, event_bus)
    /// 3. Reminders (database, event_bus)
    /// 4. Rag (store, llm, chat, event_bus)
    pub fn register_all(&mut self) {
        // 1. Chat
        self.register(self.chat.clone());

        // 2. Journal
        self.register(self.journal.clone());

        // 3. Reminders
        self.register(self.reminders.clone());

        // 4. Rag
        self.register(self.rag.clone());

        info!("registered {} default services", self.services.len());
    }

    /// Initialize all registered services in order.
    pub fn init_all(&self) -> SouloResult<()> {
        info!("initializing {} services", self.services.len());

        for (name, service) in &self.services {
            info!("initializing service: {name}");
            if let Err(e) = service.init() {
                error!("failed to initialize service {name}: {e}");
                return Err(SouloError::ServiceInit(format!("{name}: {e}")));
            }
        }

        info!("all services initialized");
        Ok(())
    }

    /// Shut down all services in reverse order.
    pub fn shutdown_all(&self) -> SouloResult<()> {
        info!("shutting down services");

        for (name, service) in self.services.iter().rev() {
            info!("shutting down service: {name}");
            if let Err(e) = service.shutdown() {
                error!("error shutting down service {name}: {e}");
            }
        }

        info!("all services shut down");
        Ok(())
    }

    /// Get a reference to the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Get the health status of all services.
    pub fn health_check(&self) -> Vec<(String, ServiceState, bool)> {
        self.services
            .iter()
            .map(|(name, svc)| (name.clone(), svc.state(), svc.is_healthy()))
            .collect()
    }

    /// Whether every registered service reports healthy.
    pub fn all_healthy(&self) -> bool {
        self.services.iter().all(|(_, svc)| svc.is_healthy())
    }

    /// Get the number of registered services.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> AppConfig {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.storage.mode = StorageMode::Local;
        config.database.path = dir.path().join("test.db").to_string_lossy().into_owned();
        std::mem::forget(dir);
        config
    }

    #[test]
    fn test_register_all() {
        let registry = ServiceRegistry::from_config(local_config()).unwrap();
        assert_eq!(registry.service_count(), 4);
        assert!(registry.backend.is_none());
        assert!(registry.sentiment.is_none());
        assert_eq!(registry.store.name(), "local");
    }

    #[test]
    fn test_init_and_shutdown() {
        let registry = ServiceRegistry::from_config(local_config()).unwrap();
        assert!(!registry.all_healthy());

        registry.init_all().unwrap();
        let health = registry.health_check();
        let names: Vec<&str> = health.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, vec!["chat", "journal", "reminders", "rag"]);
        assert!(health.iter().all(|(_, state, healthy)| *state == ServiceState::Running && *healthy));

        registry.shutdown_all().unwrap();
        assert!(registry
            .health_check()
            .iter()
            .all(|(_, state, _)| *state == ServiceState::Stopped));
    }

    #[test]
    fn test_remote_mode_requires_backend() {
        let mut config = local_config();
        config.storage.mode = StorageMode::Remote;
        assert!(matches!(
            Dependencies::from_config(&config),
            Err(SouloError::MissingConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_llm_reports_setting() {
        let registry = ServiceRegistry::from_config(local_config()).unwrap();
        let err = registry.llm.embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("llm.api_key"));
    }
}
