//! Inbound HTTP server and gateway request routing
//!
//! Two surfaces share one listener:
//! - `/gateway/json/{slug}/...` - authenticated single-shot JSON passthrough
//! - `/gateway/tunnel/{slug}/...` - standing reverse proxy incl. WebSocket

use http_body_util::{combinators::BoxBody, BodyExt};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::auth::AuthManager;
use crate::credentials::select_bearer;
use crate::directory::PortDirectory;
use crate::error::{access_denied_response, json_error_response, GatewayErrorCode};
use crate::forward::{ForwardError, JsonForwarder};
use crate::premium::{PremiumMiddleware, REASON_PREMIUM_REQUIRED};
use crate::tunnel::TunnelProxy;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded-for
const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header name for forwarded host
const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Maximum accepted tenant slug length
const MAX_SLUG_LEN: usize = 128;

/// Shared per-process gateway state, read-only during request handling
pub struct GatewayState {
    pub directory: PortDirectory,
    pub forwarder: JsonForwarder,
    pub tunnels: TunnelProxy,
    pub auth: AuthManager,
    pub premium: PremiumMiddleware,
    pub fallback_token: Option<String>,
}

/// The gateway's inbound HTTP server
pub struct GatewayServer {
    bind_addr: SocketAddr,
    state: Arc<GatewayState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    pub fn new(
        bind_addr: SocketAddr,
        state: Arc<GatewayState>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            state,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "Gateway listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&self.state);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, state).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    state: Arc<GatewayState>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { handle_request(req, state, addr).await }
    });

    // auto::Builder serves HTTP/1.1 and h2c; HTTP/1.1 connections can still
    // carry WebSocket upgrades
    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection_with_upgrades(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

/// The two inbound gateway surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Json,
    Tunnel,
}

/// Split an inbound path into surface, tenant slug, and remaining sub-path
fn parse_gateway_path(path: &str) -> Option<(Surface, &str, &str)> {
    let rest = path.strip_prefix("/gateway/")?;
    let (surface, rest) = if let Some(rest) = rest.strip_prefix("json/") {
        (Surface::Json, rest)
    } else if let Some(rest) = rest.strip_prefix("tunnel/") {
        (Surface::Tunnel, rest)
    } else {
        return None;
    };

    let (slug, sub_path) = match rest.split_once('/') {
        Some((slug, sub_path)) => (slug, sub_path),
        None => (rest, ""),
    };

    if !valid_slug(slug) {
        return None;
    }
    Some((surface, slug, sub_path))
}

/// The slug is only ever a lookup key. Restricting its alphabet keeps it out
/// of log-injection territory; case is preserved.
fn valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

async fn handle_request(
    mut req: Request<Incoming>,
    state: Arc<GatewayState>,
    client_addr: SocketAddr,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    // Propagate or generate a request ID
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // Overwrite X-Forwarded-* rather than appending: this gateway is the
    // first trusted hop, clients must not spoof these
    let headers = req.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(X_REQUEST_ID, value);
    }
    if let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Some(host) = headers.get(hyper::header::HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    let path = req.uri().path().to_string();
    debug!(method = %req.method(), path = %path, request_id, "Incoming request");

    let (surface, slug, sub_path) = match parse_gateway_path(&path) {
        Some(parsed) => parsed,
        None => {
            return Ok(json_error_response(
                GatewayErrorCode::TenantNotFound,
                "Unknown gateway path",
            ));
        }
    };
    let slug = slug.to_string();
    let sub_path = sub_path.to_string();

    match surface {
        Surface::Json => handle_json(req, state, &slug, &sub_path, &request_id).await,
        Surface::Tunnel => {
            let origin_path = match req.uri().query() {
                Some(q) => format!("/{}?{}", sub_path, q),
                None => format!("/{}", sub_path),
            };
            state
                .tunnels
                .handle(&slug, &origin_path, req, &request_id)
                .await
        }
    }
}

/// The JSON passthrough surface: authenticate, gate, resolve, forward
async fn handle_json(
    req: Request<Incoming>,
    state: Arc<GatewayState>,
    slug: &str,
    sub_path: &str,
    request_id: &str,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    // The auth collaborator attaches the caller's session before forwarding
    let claims = match authenticate(&req, &state.auth) {
        Some(claims) => claims,
        None => {
            return Ok(json_error_response(
                GatewayErrorCode::Unauthorized,
                "A valid session is required",
            ));
        }
    };

    // Premium gate: sibling middleware over gated sub-paths
    if !state.premium.permits(&claims, sub_path) {
        debug!(slug, request_id, caller = %claims.sub, "Premium gate denied request");
        return Ok(access_denied_response(
            REASON_PREMIUM_REQUIRED,
            state.premium.upgrade_url(),
        ));
    }

    // Resolve before anything touches the network; an unknown tenant makes
    // zero upstream calls
    let port = match state.directory.resolve(slug) {
        Ok(Some(port)) => port,
        Ok(None) => {
            return Ok(json_error_response(
                GatewayErrorCode::TenantNotFound,
                format!("Tenant '{}' is not provisioned", slug),
            ));
        }
        Err(e) => {
            error!(slug, request_id, error = %e, "Port directory failure");
            return Ok(json_error_response(
                GatewayErrorCode::InternalFault,
                "Internal gateway error",
            ));
        }
    };

    let credential = select_bearer(
        claims.site_credential(slug),
        state.fallback_token.as_deref(),
    );

    let method = req.method().clone();
    let query = req.uri().query().map(String::from);
    let body = req.into_body().collect().await?.to_bytes();

    let result = state
        .forwarder
        .forward(
            port,
            sub_path,
            query.as_deref(),
            method,
            credential.as_deref(),
            body,
        )
        .await;

    match result {
        Ok(response) => Ok(response),
        Err(e @ ForwardError::Transport(_)) | Err(e @ ForwardError::DeadlineExpired(_)) => {
            error!(slug, port, request_id, error = %e, "Upstream unreachable");
            Ok(json_error_response(
                GatewayErrorCode::UpstreamUnreachable,
                "Failed to reach site backend",
            ))
        }
        Err(e @ ForwardError::RequestBuild(_)) => {
            error!(slug, port, request_id, error = %e, "Failed to build upstream request");
            Ok(json_error_response(
                GatewayErrorCode::InternalFault,
                "Internal gateway error",
            ))
        }
    }
}

fn authenticate(req: &Request<Incoming>, auth: &AuthManager) -> Option<crate::auth::Claims> {
    let header = req
        .headers()
        .get(hyper::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let token = auth.extract_token_from_header(header)?;
    match auth.verify_token(&token) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            debug!(error = %e, "Session token rejected");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gateway_path_json() {
        assert_eq!(
            parse_gateway_path("/gateway/json/acme/posts"),
            Some((Surface::Json, "acme", "posts"))
        );
        assert_eq!(
            parse_gateway_path("/gateway/json/acme/posts/7/comments"),
            Some((Surface::Json, "acme", "posts/7/comments"))
        );
        assert_eq!(
            parse_gateway_path("/gateway/json/acme"),
            Some((Surface::Json, "acme", ""))
        );
    }

    #[test]
    fn test_parse_gateway_path_tunnel() {
        assert_eq!(
            parse_gateway_path("/gateway/tunnel/acme/wp-admin/index.php"),
            Some((Surface::Tunnel, "acme", "wp-admin/index.php"))
        );
    }

    #[test]
    fn test_parse_gateway_path_rejects_unknown() {
        assert_eq!(parse_gateway_path("/"), None);
        assert_eq!(parse_gateway_path("/gateway/"), None);
        assert_eq!(parse_gateway_path("/gateway/other/acme/x"), None);
        assert_eq!(parse_gateway_path("/api/json/acme/x"), None);
        assert_eq!(parse_gateway_path("/gateway/json//posts"), None);
    }

    #[test]
    fn test_slug_validation() {
        assert!(valid_slug("acme"));
        assert!(valid_slug("my-site_2.test"));
        assert!(!valid_slug(""));
        assert!(!valid_slug("bad slug"));
        assert!(!valid_slug("bad\nslug"));
        assert!(!valid_slug(&"a".repeat(MAX_SLUG_LEN + 1)));
    }

    #[test]
    fn test_slug_case_preserved() {
        // Slugs are case-sensitive lookup keys, never normalized
        assert_eq!(
            parse_gateway_path("/gateway/json/AcMe/posts"),
            Some((Surface::Json, "AcMe", "posts"))
        );
    }
}
