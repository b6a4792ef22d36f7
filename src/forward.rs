//! Single-shot JSON passthrough to a tenant's backend API
//!
//! One upstream call per inbound request over a pooled client; the upstream
//! status and raw payload are copied back verbatim. The gateway never
//! interprets or reshapes backend responses.

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::GatewayConfig;

/// Error type for forwarding operations
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Transport-level failure: connection refused, reset, DNS
    #[error("upstream transport failure: {0}")]
    Transport(hyper_util::client::legacy::Error),
    /// The upstream call exceeded its deadline
    #[error("upstream call exceeded {0:?} deadline")]
    DeadlineExpired(Duration),
    /// Error assembling the upstream request
    #[error("failed to build upstream request: {0}")]
    RequestBuild(String),
}

/// Whether an inbound method semantically carries a body upstream
///
/// Retrieval methods never do, even when the caller supplied one.
pub fn method_carries_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}

/// The forwarding gateway: builds and issues one upstream HTTP request per
/// inbound request against the tenant's local backend port.
pub struct JsonForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    api_namespace: String,
    deadline: Duration,
}

impl JsonForwarder {
    pub fn new(config: &GatewayConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .build(connector);

        Self {
            client,
            api_namespace: config.api_namespace.trim_matches('/').to_string(),
            deadline: config.upstream_timeout(),
        }
    }

    /// Build the target URI for a resolved port and remaining sub-path
    pub fn target_uri(&self, port: u16, sub_path: &str, query: Option<&str>) -> String {
        let sub_path = sub_path.trim_start_matches('/');
        let mut uri = format!(
            "http://127.0.0.1:{}/{}/{}",
            port, self.api_namespace, sub_path
        );
        if let Some(q) = query {
            uri.push('?');
            uri.push_str(q);
        }
        uri
    }

    /// Issue exactly one upstream call and return the backend's response
    ///
    /// Only called after a successful port resolution. The body is attached
    /// only when the method carries one; the selected bearer credential, when
    /// present, goes in the Authorization header.
    pub async fn forward(
        &self,
        port: u16,
        sub_path: &str,
        query: Option<&str>,
        method: Method,
        credential: Option<&str>,
        body: Bytes,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ForwardError> {
        let uri = self.target_uri(port, sub_path, query);
        debug!(port, %method, uri = %uri, "Forwarding JSON request upstream");

        let outbound_body = if method_carries_body(&method) {
            Full::new(body)
        } else {
            Full::new(Bytes::new())
        };

        let mut builder = Request::builder()
            .method(method)
            .uri(&uri)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = credential {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ForwardError::RequestBuild(e.to_string()))?;
            builder = builder.header(AUTHORIZATION, value);
        }

        let upstream_req = builder
            .body(outbound_body)
            .map_err(|e| ForwardError::RequestBuild(e.to_string()))?;

        let response = tokio::time::timeout(self.deadline, self.client.request(upstream_req))
            .await
            .map_err(|_| ForwardError::DeadlineExpired(self.deadline))?
            .map_err(ForwardError::Transport)?;

        // Any HTTP status from the backend passes through unchanged
        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn forwarder() -> JsonForwarder {
        JsonForwarder::new(&GatewayConfig::default())
    }

    #[test]
    fn test_method_carries_body() {
        assert!(!method_carries_body(&Method::GET));
        assert!(!method_carries_body(&Method::HEAD));
        assert!(method_carries_body(&Method::POST));
        assert!(method_carries_body(&Method::PUT));
        assert!(method_carries_body(&Method::PATCH));
        assert!(method_carries_body(&Method::DELETE));
    }

    #[test]
    fn test_target_uri() {
        let f = forwarder();
        assert_eq!(
            f.target_uri(4001, "posts", None),
            "http://127.0.0.1:4001/wp-json/headless/v1/posts"
        );
        assert_eq!(
            f.target_uri(4001, "/posts/7", Some("context=edit")),
            "http://127.0.0.1:4001/wp-json/headless/v1/posts/7?context=edit"
        );
    }

    #[test]
    fn test_target_uri_custom_namespace_trimmed() {
        let config = GatewayConfig {
            api_namespace: "/api/v2/".to_string(),
            ..GatewayConfig::default()
        };
        let f = JsonForwarder::new(&config);
        assert_eq!(f.target_uri(4001, "posts", None), "http://127.0.0.1:4001/api/v2/posts");
    }

    #[tokio::test]
    async fn test_forward_to_dead_port_is_transport_error() {
        let f = forwarder();
        // Port from the reserved range, nothing listens there in tests
        let err = f
            .forward(1, "posts", None, Method::GET, None, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::Transport(_)));
    }
}
