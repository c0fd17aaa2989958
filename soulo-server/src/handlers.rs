//! Route handlers.
//!
//! Every handler takes the raw request body and returns a JSON reply.
//! Failures are reported as HTTP 200 with `error` and `errorCode` so that
//! browser clients can read them across origins; only auth failures (401)
//! and unknown routes (404) use other statuses.

use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use hyper::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use soulo_core::error::{SouloError, SouloResult};
use soulo_models::models::journal_entry::sentiment_label;
use soulo_services::{ChatRagRequest, ServiceRegistry};

use crate::auth::BearerAuth;

/// Reindex batch size when a request does not give one.
const DEFAULT_REINDEX_LIMIT: usize = 100;

/// Shared context passed to every request handler.
pub struct ServerContext {
    pub registry: Arc<ServiceRegistry>,
    pub auth: BearerAuth,
    pub max_body_bytes: usize,
    pub default_user_id: String,
}

/// A handler result before it is turned into an HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Option<Value>,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self { status: StatusCode::OK, body: Some(body) }
    }

    pub fn no_content() -> Self {
        Self { status: StatusCode::NO_CONTENT, body: None }
    }

    /// Error payload delivered with status 200.
    pub fn error(err: &SouloError) -> Self {
        Self::ok(json!({ "error": err.to_string(), "errorCode": err.error_code() }))
    }

    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: Some(json!({ "error": "unauthorized", "errorCode": "auth_failed" })),
        }
    }

    fn not_found(path: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: Some(json!({ "error": format!("no route for {path}"), "errorCode": "not_found" })),
        }
    }
}

impl From<SouloResult<Value>> for Reply {
    fn from(result: SouloResult<Value>) -> Self {
        match result {
            Ok(body) => Self::ok(body),
            Err(e) => {
                warn!("request failed: {e}");
                Self::error(&e)
            }
        }
    }
}

/// Route a request whose body has already been read.
pub async fn dispatch(
    ctx: &ServerContext,
    method: &Method,
    path: &str,
    auth_header: Option<&str>,
    body: &[u8],
) -> Reply {
    if method == Method::OPTIONS {
        return Reply::no_content();
    }

    if !ctx.auth.validate(auth_header) {
        warn!("unauthorized request to {path}");
        return Reply::unauthorized();
    }

    let path = path.trim_end_matches('/');
    debug!("{method} {path}");

    match (method, path) {
        (&Method::GET, "/health") => Reply::ok(health(ctx)),
        (&Method::POST, "/chat-with-rag") => chat_with_rag(ctx, body).await.into(),
        (&Method::POST, "/transcribe-audio") => transcribe_audio(ctx, body).await.into(),
        (&Method::POST, "/analyze-sentiment") => analyze_sentiment(ctx, body).await.into(),
        (&Method::POST, "/generate-embeddings") => generate_embeddings(ctx, body).await.into(),
        (&Method::POST, "/query-plan") => query_plan(ctx, body).into(),
        _ => Reply::not_found(path),
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> SouloResult<T> {
    if body.is_empty() {
        return Err(SouloError::InvalidInput("request body is empty".into()));
    }
    serde_json::from_slice(body).map_err(|e| SouloError::InvalidInput(format!("invalid request body: {e}")))
}

fn user_or_default<'a>(ctx: &'a ServerContext, user_id: &'a Option<String>) -> &'a str {
    user_id
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(&ctx.default_user_id)
}

fn health(ctx: &ServerContext) -> Value {
    let registry = &ctx.registry;
    let services: Vec<Value> = registry
        .health_check()
        .into_iter()
        .map(|(name, state, healthy)| json!({ "name": name, "state": state.to_string(), "healthy": healthy }))
        .collect();
    json!({
        "status": if registry.all_healthy() { "ok" } else { "degraded" },
        "store": registry.store.name(),
        "sentiment": registry.sentiment.is_some(),
        "services": services,
    })
}

async fn chat_with_rag(ctx: &ServerContext, body: &[u8]) -> SouloResult<Value> {
    let request: ChatRagRequest = parse_body(body)?;
    let response = ctx.registry.rag.handle(request).await;
    Ok(serde_json::to_value(response)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscribeRequest {
    /// Base64 audio, optionally as a `data:` URL.
    audio: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    /// Store the transcript as a journal entry.
    #[serde(default = "default_true")]
    save_entry: bool,
}

fn default_true() -> bool {
    true
}

/// Split an optional `data:<mime>;base64,` prefix off and decode.
pub fn decode_audio(audio: &str) -> SouloResult<(Vec<u8>, Option<String>)> {
    let (mime, payload) = match audio.strip_prefix("data:") {
        Some(rest) => match rest.split_once(',') {
            Some((meta, data)) => {
                let mime = meta.split(';').next().filter(|m| !m.is_empty()).map(str::to_string);
                (mime, data)
            }
            None => return Err(SouloError::InvalidInput("malformed data URL".into())),
        },
        None => (None, audio),
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| SouloError::InvalidInput(format!("audio is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(SouloError::InvalidInput("audio is empty".into()));
    }
    Ok((bytes, mime))
}

async fn transcribe_audio(ctx: &ServerContext, body: &[u8]) -> SouloResult<Value> {
    let request: TranscribeRequest = parse_body(body)?;
    let (audio, data_mime) = decode_audio(&request.audio)?;
    let mime = request
        .mime_type
        .clone()
        .or(data_mime)
        .unwrap_or_else(|| "audio/webm".to_string());

    if !request.save_entry {
        let result = ctx.registry.transcriber.transcribe(&audio, &mime).await?;
        return Ok(serde_json::to_value(result)?);
    }

    let user_id = user_or_default(ctx, &request.user_id);
    let processed = ctx.registry.journal.process_recording(&audio, &mime, user_id).await?;
    Ok(json!({
        "transcript": processed.entry.transcript,
        "content": processed.entry.content,
        "entry": processed.entry,
        "skippedSteps": processed.skipped_steps,
    }))
}

#[derive(Debug, Deserialize)]
struct TextRequest {
    text: String,
}

async fn analyze_sentiment(ctx: &ServerContext, body: &[u8]) -> SouloResult<Value> {
    let request: TextRequest = parse_body(body)?;
    if request.text.trim().is_empty() {
        return Err(SouloError::InvalidInput("text is empty".into()));
    }
    let analyzer = ctx
        .registry
        .sentiment
        .as_ref()
        .ok_or_else(|| SouloError::MissingConfig("sentiment.api_key".into()))?;
    let score = analyzer.analyze(&request.text).await?;
    Ok(json!({
        "score": score.score,
        "magnitude": score.magnitude,
        "label": sentiment_label(Some(score.score)),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddingRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Embed `text`, or backfill the user's entries without embeddings when no
/// text is given.
async fn generate_embeddings(ctx: &ServerContext, body: &[u8]) -> SouloResult<Value> {
    let request: EmbeddingRequest = parse_body(body)?;
    match request.text.as_deref().map(str::trim) {
        Some("") => Err(SouloError::InvalidInput("text is empty".into())),
        Some(text) => {
            let embedding = ctx.registry.llm.embed(text).await?;
            Ok(json!({ "dimensions": embedding.len(), "embedding": embedding }))
        }
        None => {
            let user_id = user_or_default(ctx, &request.user_id);
            let limit = request.limit.unwrap_or(DEFAULT_REINDEX_LIMIT).max(1);
            let report = ctx.registry.journal.reindex_missing_embeddings(user_id, limit).await?;
            Ok(serde_json::to_value(report)?)
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlanRequest {
    message: String,
}

fn query_plan(ctx: &ServerContext, body: &[u8]) -> SouloResult<Value> {
    let request: PlanRequest = parse_body(body)?;
    if request.message.trim().is_empty() {
        return Err(SouloError::InvalidInput("message is empty".into()));
    }
    let preview = ctx.registry.rag.preview(request.message.trim(), Utc::now());
    Ok(serde_json::to_value(preview)?)
}
