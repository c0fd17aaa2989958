//! Soulo API - HTTP clients for the services the journal backend wraps.
//!
//! A shared [`ApiClient`] handles authentication headers, timeouts, status
//! classification and exponential backoff retry. Each upstream gets a thin
//! typed wrapper in [`endpoints`]: the managed Postgres backend (PostgREST
//! tables and RPC), the language model (chat completions and embeddings),
//! speech-to-text, and sentiment analysis.

pub mod client;
pub mod endpoints;
pub mod response;

// Re-export key types
pub use client::{ApiClient, Backoff, Call};
pub use endpoints::backend::{BackendClient, Filter};
pub use endpoints::llm::{ChatMessageParam, CompletionOptions, LlmClient};
pub use endpoints::sentiment::{SentimentClient, SentimentScore};
pub use endpoints::speech::{SpeechClient, TranscriptionResult};
