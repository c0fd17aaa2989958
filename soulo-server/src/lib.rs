//! Soulo Server - stateless HTTP handlers over the journal services.
//!
//! Routes:
//! - `GET  /health`
//! - `POST /chat-with-rag`
//! - `POST /transcribe-audio`
//! - `POST /analyze-sentiment`
//! - `POST /generate-embeddings`
//! - `POST /query-plan`
//!
//! Every response carries CORS headers. When `server.auth_token` is set,
//! requests need `Authorization: Bearer <token>`.

pub mod auth;
pub mod handlers;
pub mod server;

use std::sync::Arc;

use tokio::sync::watch;

use soulo_core::config::AppConfig;
use soulo_core::error::SouloResult;
use soulo_services::ServiceRegistry;

pub use auth::{generate_token, BearerAuth};
pub use handlers::{dispatch, Reply, ServerContext};

/// Serve the registry's services with the server settings from `config`
/// until `shutdown_rx` reports `true`.
pub async fn serve(
    registry: Arc<ServiceRegistry>,
    config: &AppConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> SouloResult<()> {
    let addr = server::bind_addr(&config.server)?;
    let ctx = server::context(registry, &config.server, &config.storage.default_user_id);
    server::start(Arc::new(ctx), addr, shutdown_rx).await
}
