//! Soulo Services - Business logic and service layer.
//!
//! This crate provides the service trait, the service registry that wires
//! stores and vendor clients together, and the concrete services:
//! - Retrieval pipeline behind "chat with RAG" (classify, plan, route,
//!   search, generate)
//! - Journal entry processing (transcription, refinement, sentiment,
//!   emotion/theme extraction, embeddings)
//! - Chat threads and messages
//! - Journal reminder schedule
//! - Journal stores over the managed backend or the local database
//! - Event bus (typed intra-service communication)

pub mod service;
pub mod registry;
pub mod event_bus;
pub mod traits;
pub mod store;
pub mod rag;
pub mod journal;
pub mod chat;
pub mod reminder;

// Re-export key types
pub use service::{Service, ServiceState};
pub use registry::{Dependencies, ServiceRegistry};
pub use event_bus::{AppEvent, EventBus};
pub use traits::{LanguageModel, SentimentAnalyzer, Transcriber};
pub use store::{JournalStore, LocalStore, RemoteStore, SqlDialect};
pub use rag::pipeline::{ChatRagRequest, ChatRagResponse, QueryPreview, RagPipeline};
pub use journal::JournalService;
pub use chat::ChatService;
pub use reminder::ReminderService;
