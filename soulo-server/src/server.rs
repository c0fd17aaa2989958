//! HTTP server using hyper 1.x.
//!
//! Accepts connections on the configured address and serves every request
//! on its own task until the shutdown signal flips to `true`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use soulo_core::config::ServerConfig;
use soulo_core::error::{SouloError, SouloResult};
use soulo_services::ServiceRegistry;

use crate::auth::BearerAuth;
use crate::handlers::{dispatch, Reply, ServerContext};

type BoxBody = http_body_util::combinators::UnsyncBoxBody<Bytes, Infallible>;

/// Build the request context from the registry and server settings.
pub fn context(registry: Arc<ServiceRegistry>, config: &ServerConfig, default_user_id: &str) -> ServerContext {
    ServerContext {
        registry,
        auth: BearerAuth::new(&config.auth_token),
        max_body_bytes: config.max_body_bytes,
        default_user_id: default_user_id.to_string(),
    }
}

/// Parse `bind_address:port`.
pub fn bind_addr(config: &ServerConfig) -> SouloResult<SocketAddr> {
    format!("{}:{}", config.bind_address, config.port)
        .parse()
        .map_err(|e| SouloError::Config(format!("invalid server address {}:{}: {e}", config.bind_address, config.port)))
}

/// Bind and serve until `shutdown_rx` reports `true`.
pub async fn start(
    ctx: Arc<ServerContext>,
    addr: SocketAddr,
    mut shutdown_rx: watch::Receiver<bool>,
) -> SouloResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| SouloError::Service(format!("failed to bind server on {addr}: {e}")))?;

    info!(auth = ctx.auth.is_enabled(), "serving edge functions on http://{addr}");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    debug!(%remote, "accepted connection");
                    tokio::spawn(serve_connection(stream, ctx.clone()));
                }
                Err(e) => warn!("accept failed: {e}"),
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("server stopping");
                    return Ok(());
                }
            }
        }
    }
}

async fn serve_connection(stream: tokio::net::TcpStream, ctx: Arc<ServerContext>) {
    let svc = service_fn(move |req| handle_request(req, ctx.clone()));
    if let Err(e) = http1::Builder::new()
        .serve_connection(hyper_util::rt::TokioIo::new(stream), svc)
        .await
    {
        debug!("connection closed with error: {e}");
    }
}

/// Read the body (bounded) and hand the request to the router.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    ctx: Arc<ServerContext>,
) -> Result<Response<BoxBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = match Limited::new(req.into_body(), ctx.max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let err = SouloError::InvalidInput(format!("failed to read body: {e}"));
            return Ok(into_response(Reply::error(&err)));
        }
    };

    let reply = dispatch(&ctx, &method, &path, auth_header.as_deref(), &body).await;
    Ok(into_response(reply))
}

const CORS_HEADERS: [(&str, &str); 3] = [
    ("access-control-allow-origin", "*"),
    ("access-control-allow-methods", "GET, POST, OPTIONS"),
    ("access-control-allow-headers", "authorization, x-client-info, apikey, content-type"),
];

fn into_response(reply: Reply) -> Response<BoxBody> {
    let json = reply.body.is_some();
    let text = reply.body.map(|v| v.to_string()).unwrap_or_default();
    let mut resp = Response::new(BoxBody::new(
        Full::new(Bytes::from(text)).map_err(|never| match never {}),
    ));
    *resp.status_mut() = reply.status;

    let headers = resp.headers_mut();
    if json {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    for (name, value) in CORS_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    #[test]
    fn test_bind_addr() {
        let mut config = ServerConfig {
            bind_address: "127.0.0.1".into(),
            port: 8787,
            auth_token: String::new(),
            max_body_bytes: 1024,
        };
        assert_eq!(bind_addr(&config).unwrap().port(), 8787);
        config.bind_address = "not an address".into();
        assert!(matches!(bind_addr(&config), Err(SouloError::Config(_))));
    }

    #[test]
    fn test_responses_carry_cors_headers() {
        let resp = into_response(Reply::no_content());
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        assert!(resp.headers().get(CONTENT_TYPE).is_none());

        let resp = into_response(Reply::ok(serde_json::json!({"ok": true})));
        assert_eq!(resp.headers()[CONTENT_TYPE], "application/json");
        assert!(resp.headers().contains_key("access-control-allow-methods"));
    }
}
