//! Standing reverse-proxy routes per tenant, including WebSocket passthrough
//!
//! A tunnel route binds a tenant slug to an origin base URL once, at startup,
//! and relays every matching inbound request for the process lifetime.
//! Re-registering a slug overwrites its route; there is no deregistration.
//! One caller's origin failure never tears down the route.

use dashmap::DashMap;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info, warn};

use crate::config::TunnelConfig;
use crate::error::{json_error_response, GatewayErrorCode};

/// Errors from tunnel registration
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("invalid origin base URL '{0}'")]
    InvalidOrigin(String),
}

/// Scheme of a tunnel origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginScheme {
    Http,
    Https,
}

/// A parsed tunnel origin: scheme, host, port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub scheme: OriginScheme,
    pub host: String,
    pub port: u16,
}

impl Origin {
    /// Parse an origin base URL like `http://127.0.0.1:4001` or
    /// `https://origin.internal`
    pub fn parse(base_url: &str) -> Result<Self, TunnelError> {
        let invalid = || TunnelError::InvalidOrigin(base_url.to_string());

        let (scheme, rest) = if let Some(rest) = base_url.strip_prefix("http://") {
            (OriginScheme::Http, rest)
        } else if let Some(rest) = base_url.strip_prefix("https://") {
            (OriginScheme::Https, rest)
        } else {
            return Err(invalid());
        };

        let authority = rest.trim_end_matches('/');
        if authority.is_empty() || authority.contains('/') {
            return Err(invalid());
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| invalid())?;
                if port == 0 {
                    return Err(invalid());
                }
                (host, port)
            }
            None => {
                let default = match scheme {
                    OriginScheme::Http => 80,
                    OriginScheme::Https => 443,
                };
                (authority, default)
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    /// host:port form used in Host headers and socket addresses
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_https(&self) -> bool {
        self.scheme == OriginScheme::Https
    }
}

/// A registered forwarding rule for one tenant
#[derive(Debug, Clone)]
pub struct TunnelRoute {
    pub origin: Origin,
    pub allow_websocket: bool,
}

/// The tunnel route table: slug -> route
///
/// Written only at registration time (startup, or a directory refresh);
/// read-shared by every request handler afterwards.
#[derive(Default)]
pub struct TunnelTable {
    routes: DashMap<String, TunnelRoute>,
}

impl TunnelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route for a tenant. Idempotent per slug; a different origin
    /// for the same slug overwrites the active route.
    pub fn register(
        &self,
        slug: impl Into<String>,
        origin_base_url: &str,
        allow_websocket: bool,
    ) -> Result<(), TunnelError> {
        let slug = slug.into();
        let origin = Origin::parse(origin_base_url)?;
        let replaced = self
            .routes
            .insert(
                slug.clone(),
                TunnelRoute {
                    origin,
                    allow_websocket,
                },
            )
            .is_some();
        if replaced {
            info!(slug, origin = origin_base_url, "Tunnel route overwritten");
        } else {
            info!(slug, origin = origin_base_url, "Tunnel route registered");
        }
        Ok(())
    }

    pub fn get(&self, slug: &str) -> Option<TunnelRoute> {
        self.routes.get(slug).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Check if a request asks for a protocol upgrade (WebSocket)
pub fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    let has_upgrade_connection = req
        .headers()
        .get(hyper::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().contains("upgrade"))
        .unwrap_or(false);

    let has_upgrade_header = req.headers().contains_key(hyper::header::UPGRADE);

    has_upgrade_connection && has_upgrade_header
}

fn get_upgrade_type<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(hyper::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_lowercase())
}

/// Relays inbound traffic for registered tunnel routes
pub struct TunnelProxy {
    table: Arc<TunnelTable>,
    tls: TlsConnector,
    deadline: Duration,
}

impl TunnelProxy {
    pub fn new(table: Arc<TunnelTable>, config: &TunnelConfig) -> Self {
        Self {
            table,
            tls: build_tls_connector(config.insecure_skip_verify),
            deadline: config.upstream_timeout(),
        }
    }

    pub fn table(&self) -> &Arc<TunnelTable> {
        &self.table
    }

    /// Handle one inbound request addressed to a tenant's tunnel namespace.
    ///
    /// `origin_path` is the remaining path (plus query) after the
    /// tenant-scoped prefix, already beginning with `/`.
    pub async fn handle(
        &self,
        slug: &str,
        origin_path: &str,
        req: Request<Incoming>,
        request_id: &str,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
        let route = match self.table.get(slug) {
            Some(route) => route,
            None => {
                return Ok(json_error_response(
                    GatewayErrorCode::TenantNotFound,
                    format!("No tunnel registered for tenant '{}'", slug),
                ));
            }
        };

        if is_upgrade_request(&req) {
            if route.allow_websocket {
                return self
                    .handle_upgrade(req, route, slug, origin_path, request_id)
                    .await;
            }
            debug!(slug, request_id, "Upgrade requested but disabled, relaying as plain request");
        }

        self.relay_plain(req, route, slug, origin_path, request_id)
            .await
    }

    /// Relay a non-upgrade request: method, headers, body preserved unmodified
    async fn relay_plain(
        &self,
        req: Request<Incoming>,
        route: TunnelRoute,
        slug: &str,
        origin_path: &str,
        request_id: &str,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();

        let mut builder = Request::builder().method(parts.method).uri(origin_path);
        for (name, value) in parts.headers.iter() {
            // Hop-by-hop headers stay on this side of the relay; Host is
            // rewritten to the origin authority below, and the body is
            // re-framed as Content-Length after collect()
            if matches!(
                name.as_str(),
                "connection" | "upgrade" | "host" | "transfer-encoding" | "keep-alive" | "te"
                    | "proxy-connection"
            ) {
                continue;
            }
            builder = builder.header(name, value);
        }
        builder = builder.header(
            hyper::header::HOST,
            HeaderValue::from_str(&route.origin.authority())
                .unwrap_or_else(|_| HeaderValue::from_static("invalid")),
        );

        let origin_req = match builder.body(Full::new(body)) {
            Ok(r) => r,
            Err(e) => {
                error!(slug, request_id, error = %e, "Failed to build origin request");
                return Ok(json_error_response(
                    GatewayErrorCode::InternalFault,
                    "Internal gateway error",
                ));
            }
        };

        let result = tokio::time::timeout(
            self.deadline,
            self.send_to_origin(origin_req, &route.origin),
        )
        .await;

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                // This one caller gets an error; the route stays up
                error!(slug, request_id, origin = %route.origin.authority(), error = %e, "Origin unreachable");
                Ok(json_error_response(
                    GatewayErrorCode::UpstreamUnreachable,
                    "Failed to reach site origin",
                ))
            }
            Err(_) => {
                warn!(slug, request_id, timeout_secs = self.deadline.as_secs(), "Origin request timed out");
                Ok(json_error_response(
                    GatewayErrorCode::UpstreamUnreachable,
                    format!(
                        "Origin did not respond within {} seconds",
                        self.deadline.as_secs()
                    ),
                ))
            }
        }
    }

    /// Send one request over a fresh origin connection, TLS when the origin
    /// scheme asks for it
    async fn send_to_origin(
        &self,
        req: Request<Full<Bytes>>,
        origin: &Origin,
    ) -> anyhow::Result<Response<BoxBody<Bytes, hyper::Error>>> {
        let stream = TcpStream::connect(origin.authority()).await?;
        stream.set_nodelay(true)?;

        if origin.is_https() {
            let server_name = ServerName::try_from(origin.host.clone())
                .map_err(|e| anyhow::anyhow!("Invalid origin host name: {}", e))?;
            let tls_stream = self.tls.connect(server_name, stream).await?;
            self.exchange(req, tls_stream).await
        } else {
            self.exchange(req, stream).await
        }
    }

    async fn exchange<S>(
        &self,
        req: Request<Full<Bytes>>,
        stream: S,
    ) -> anyhow::Result<Response<BoxBody<Bytes, hyper::Error>>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "Origin connection closed with error");
            }
        });

        let response = sender.send_request(req).await?;
        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed()))
    }

    /// Handle a WebSocket upgrade request: perform the origin handshake over a
    /// raw stream, then splice the two connections together byte for byte.
    async fn handle_upgrade(
        &self,
        req: Request<Incoming>,
        route: TunnelRoute,
        slug: &str,
        origin_path: &str,
        request_id: &str,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
        let upgrade_type = get_upgrade_type(&req).unwrap_or_else(|| "unknown".to_string());
        debug!(slug, request_id, upgrade_type, "Handling upgrade request");

        let raw_request = build_upgrade_request(&req, origin_path, &route.origin);

        let stream = match TcpStream::connect(route.origin.authority()).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(slug, request_id, origin = %route.origin.authority(), error = %e, "Failed to connect to origin for upgrade");
                return Ok(json_error_response(
                    GatewayErrorCode::UpstreamUnreachable,
                    "Failed to reach site origin",
                ));
            }
        };

        if route.origin.is_https() {
            let server_name = match ServerName::try_from(route.origin.host.clone()) {
                Ok(name) => name,
                Err(e) => {
                    error!(slug, request_id, error = %e, "Invalid origin host name");
                    return Ok(json_error_response(
                        GatewayErrorCode::InternalFault,
                        "Internal gateway error",
                    ));
                }
            };
            match self.tls.connect(server_name, stream).await {
                Ok(tls_stream) => {
                    run_upgrade(req, tls_stream, raw_request, slug, request_id).await
                }
                Err(e) => {
                    error!(slug, request_id, error = %e, "TLS handshake with origin failed");
                    Ok(json_error_response(
                        GatewayErrorCode::UpstreamUnreachable,
                        "Failed to reach site origin",
                    ))
                }
            }
        } else {
            run_upgrade(req, stream, raw_request, slug, request_id).await
        }
    }
}

/// Perform the origin upgrade handshake over `origin_stream`, answer the
/// client, then forward bytes bidirectionally for the connection lifetime.
async fn run_upgrade<S>(
    req: Request<Incoming>,
    mut origin_stream: S,
    raw_request: Vec<u8>,
    slug: &str,
    request_id: &str,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if let Err(e) = origin_stream.write_all(&raw_request).await {
        error!(slug, request_id, error = %e, "Failed to send upgrade request to origin");
        return Ok(json_error_response(
            GatewayErrorCode::UpstreamUnreachable,
            "Failed to reach site origin",
        ));
    }

    // Read until the end of the origin's response head. Bytes past the head
    // (early frames) must be delivered to the client, not dropped.
    let mut response_buf = Vec::with_capacity(4096);
    let header_end = loop {
        let mut chunk = [0u8; 4096];
        let n = match origin_stream.read(&mut chunk).await {
            Ok(0) => {
                error!(slug, request_id, "Origin closed connection before responding to upgrade");
                return Ok(json_error_response(
                    GatewayErrorCode::UpstreamUnreachable,
                    "Origin closed connection",
                ));
            }
            Ok(n) => n,
            Err(e) => {
                error!(slug, request_id, error = %e, "Failed to read upgrade response from origin");
                return Ok(json_error_response(
                    GatewayErrorCode::UpstreamUnreachable,
                    "Failed to read origin response",
                ));
            }
        };
        response_buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&response_buf) {
            break pos;
        }
        if response_buf.len() > 64 * 1024 {
            error!(slug, request_id, "Origin upgrade response head too large");
            return Ok(json_error_response(
                GatewayErrorCode::UpstreamUnreachable,
                "Invalid upgrade response from origin",
            ));
        }
    };

    let (status, response_headers) = match parse_upgrade_response(&response_buf[..header_end]) {
        Some(parsed) => parsed,
        None => {
            error!(slug, request_id, "Failed to parse origin upgrade response");
            return Ok(json_error_response(
                GatewayErrorCode::UpstreamUnreachable,
                "Invalid upgrade response from origin",
            ));
        }
    };

    if status != StatusCode::SWITCHING_PROTOCOLS {
        warn!(slug, request_id, status = %status, "Origin rejected upgrade request");
        // Return the origin's non-101 response as-is
        let mut response = Response::builder().status(status);
        for (name, value) in &response_headers {
            if let Ok(hv) = HeaderValue::from_str(value) {
                response = response.header(name.as_str(), hv);
            }
        }
        return Ok(response
            .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
            .expect("valid response builder"));
    }

    info!(slug, request_id, "WebSocket upgrade successful");

    let mut response = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    for (name, value) in &response_headers {
        // Skip hop-by-hop headers that hyper handles
        let name_lower = name.to_lowercase();
        if name_lower == "content-length" || name_lower == "transfer-encoding" {
            continue;
        }
        if let Ok(hv) = HeaderValue::from_str(value) {
            response = response.header(name.as_str(), hv);
        }
    }

    let response = response
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .expect("valid response builder");

    // Frames the origin sent in the same read as its response head
    let leftover = response_buf[header_end..].to_vec();

    let slug = slug.to_string();
    let request_id = request_id.to_string();
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                debug!(slug, request_id, "Client upgrade complete, starting forwarding");
                forward_bidirectional(upgraded, origin_stream, leftover, &slug, &request_id).await;
            }
            Err(e) => {
                error!(slug, request_id, error = %e, "Failed to upgrade client connection");
            }
        }
        debug!(slug, request_id, "WebSocket connection closed");
    });

    Ok(response)
}

/// Forward bytes bidirectionally between the client and origin connections
async fn forward_bidirectional<S>(
    client: Upgraded,
    origin: S,
    leftover: Vec<u8>,
    slug: &str,
    request_id: &str,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut client_io = TokioIo::new(client);
    let mut origin_io = origin;

    if !leftover.is_empty() {
        if let Err(e) = client_io.write_all(&leftover).await {
            debug!(slug, request_id, error = %e, "Failed to flush early origin frames");
            return;
        }
    }

    match tokio::io::copy_bidirectional(&mut client_io, &mut origin_io).await {
        Ok((client_to_origin, origin_to_client)) => {
            debug!(
                slug,
                request_id,
                client_to_origin,
                origin_to_client,
                "WebSocket connection closed normally"
            );
        }
        Err(e) => {
            debug!(slug, request_id, error = %e, "WebSocket connection closed with error");
        }
    }
}

/// Build the raw HTTP upgrade request to send to the origin
fn build_upgrade_request<B>(req: &Request<B>, origin_path: &str, origin: &Origin) -> Vec<u8> {
    let mut request = format!("{} {} HTTP/1.1\r\n", req.method(), origin_path);

    for (name, value) in req.headers() {
        if name.as_str() == "host" {
            continue;
        }
        if let Ok(v) = value.to_str() {
            request.push_str(&format!("{}: {}\r\n", name, v));
        }
    }

    request.push_str(&format!("Host: {}\r\n", origin.authority()));
    request.push_str("\r\n");

    request.into_bytes()
}

/// Position just past the `\r\n\r\n` terminating the response head
fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Parse the origin's HTTP response head for status and headers
fn parse_upgrade_response(data: &[u8]) -> Option<(StatusCode, Vec<(String, String)>)> {
    let response_str = std::str::from_utf8(data).ok()?;
    let mut lines = response_str.lines();

    // Status line: HTTP/1.1 101 Switching Protocols
    let status_line = lines.next()?;
    let parts: Vec<&str> = status_line.splitn(3, ' ').collect();
    if parts.len() < 2 {
        return None;
    }

    let status_code: u16 = parts[1].parse().ok()?;
    let status = StatusCode::from_u16(status_code).ok()?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Some((status, headers))
}

/// TLS connector toward https origins. Certificate validation is on by
/// default; the skip-verify path exists for development origins only.
fn build_tls_connector(insecure_skip_verify: bool) -> TlsConnector {
    let config = if insecure_skip_verify {
        warn!("Origin certificate validation DISABLED (tunnel.insecure_skip_verify) - development only");
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerifier::new()))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    TlsConnector::from(Arc::new(config))
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::CryptoProvider;
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// Accepts any origin certificate. Only reachable through the explicit
    /// `insecure_skip_verify` configuration opt-out.
    #[derive(Debug)]
    pub struct NoVerifier {
        provider: CryptoProvider,
    }

    impl NoVerifier {
        pub fn new() -> Self {
            Self {
                provider: rustls::crypto::ring::default_provider(),
            }
        }
    }

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.provider
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_parse_http_with_port() {
        let origin = Origin::parse("http://127.0.0.1:4001").unwrap();
        assert_eq!(origin.scheme, OriginScheme::Http);
        assert_eq!(origin.host, "127.0.0.1");
        assert_eq!(origin.port, 4001);
        assert_eq!(origin.authority(), "127.0.0.1:4001");
        assert!(!origin.is_https());
    }

    #[test]
    fn test_origin_parse_default_ports() {
        assert_eq!(Origin::parse("http://origin.internal").unwrap().port, 80);
        assert_eq!(Origin::parse("https://origin.internal").unwrap().port, 443);
    }

    #[test]
    fn test_origin_parse_trailing_slash() {
        let origin = Origin::parse("http://127.0.0.1:4001/").unwrap();
        assert_eq!(origin.port, 4001);
    }

    #[test]
    fn test_origin_parse_rejects_garbage() {
        assert!(Origin::parse("127.0.0.1:4001").is_err());
        assert!(Origin::parse("ftp://x").is_err());
        assert!(Origin::parse("http://").is_err());
        assert!(Origin::parse("http://host:0").is_err());
        assert!(Origin::parse("http://host:notaport").is_err());
        assert!(Origin::parse("http://host/path").is_err());
    }

    #[test]
    fn test_register_and_lookup() {
        let table = TunnelTable::new();
        table.register("acme", "http://127.0.0.1:4001", true).unwrap();

        let route = table.get("acme").unwrap();
        assert_eq!(route.origin.port, 4001);
        assert!(route.allow_websocket);
        assert!(table.get("ghost").is_none());
    }

    #[test]
    fn test_register_idempotent() {
        let table = TunnelTable::new();
        table.register("acme", "http://127.0.0.1:4001", true).unwrap();
        table.register("acme", "http://127.0.0.1:4001", true).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("acme").unwrap().origin.port, 4001);
    }

    #[test]
    fn test_register_overwrites_origin() {
        let table = TunnelTable::new();
        table.register("acme", "http://127.0.0.1:4001", true).unwrap();
        table.register("acme", "http://127.0.0.1:5001", false).unwrap();

        let route = table.get("acme").unwrap();
        assert_eq!(route.origin.port, 5001);
        assert!(!route.allow_websocket);
    }

    #[test]
    fn test_register_invalid_origin() {
        let table = TunnelTable::new();
        assert!(table.register("acme", "not-a-url", true).is_err());
        assert!(table.get("acme").is_none());
    }

    #[test]
    fn test_is_upgrade_request() {
        let upgrade = Request::builder()
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .body(())
            .unwrap();
        assert!(is_upgrade_request(&upgrade));

        let keep_alive_upgrade = Request::builder()
            .header("Connection", "keep-alive, Upgrade")
            .header("Upgrade", "websocket")
            .body(())
            .unwrap();
        assert!(is_upgrade_request(&keep_alive_upgrade));

        let plain = Request::builder().body(()).unwrap();
        assert!(!is_upgrade_request(&plain));

        let connection_only = Request::builder()
            .header("Connection", "Upgrade")
            .body(())
            .unwrap();
        assert!(!is_upgrade_request(&connection_only));
    }

    #[test]
    fn test_tls_connector_builds_in_both_modes() {
        // Construction must not panic: the crypto provider comes from the
        // crate's ring feature set, in the verifying and skip-verify paths
        let _ = build_tls_connector(false);
        let _ = build_tls_connector(true);
        let table = Arc::new(TunnelTable::new());
        let _ = TunnelProxy::new(table, &TunnelConfig::default());
    }

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"HTTP/1.1 101 X\r\n\r\n"), Some(18));
        assert_eq!(find_header_end(b"HTTP/1.1 101 X\r\n\r\nframe"), Some(18));
        assert_eq!(find_header_end(b"HTTP/1.1 101 X\r\n"), None);
    }

    #[test]
    fn test_parse_upgrade_response() {
        let raw = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
        let (status, headers) = parse_upgrade_response(raw).unwrap();
        assert_eq!(status, StatusCode::SWITCHING_PROTOCOLS);
        assert!(headers
            .iter()
            .any(|(n, v)| n == "Upgrade" && v == "websocket"));
    }

    #[test]
    fn test_parse_upgrade_response_rejects_garbage() {
        assert!(parse_upgrade_response(b"nonsense").is_none());
        assert!(parse_upgrade_response(&[0xff, 0xfe]).is_none());
    }

    #[test]
    fn test_build_upgrade_request_rewrites_path_and_host() {
        let req = Request::builder()
            .uri("/gateway/tunnel/acme/socket")
            .header("Host", "gateway.example.com")
            .header("Upgrade", "websocket")
            .body(())
            .unwrap();
        let origin = Origin::parse("http://127.0.0.1:4001").unwrap();
        let raw = build_upgrade_request(&req, "/socket", &origin);
        let text = String::from_utf8(raw).unwrap();

        assert!(text.starts_with("GET /socket HTTP/1.1\r\n"));
        assert!(text.contains("Host: 127.0.0.1:4001\r\n"));
        assert!(text.contains("upgrade: websocket\r\n"));
        assert!(!text.contains("gateway.example.com"));
    }
}
