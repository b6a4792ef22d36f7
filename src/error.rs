//! Error taxonomy and JSON error responses for the gateway

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Error codes for gateway errors
///
/// Upstream errors (backend reached, non-2xx status) are deliberately not
/// represented here: the upstream status and body pass through verbatim.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorCode {
    /// Slug has no entry in the port directory
    TenantNotFound,
    /// Transport-level failure or deadline expiry reaching the backend
    UpstreamUnreachable,
    /// Missing or invalid session on an authenticated surface
    Unauthorized,
    /// Caller lacks a required capability (premium gate)
    AccessDenied,
    /// Anything unexpected: directory corruption, credential source failure
    InternalFault,
}

impl GatewayErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayErrorCode::TenantNotFound => StatusCode::NOT_FOUND,
            GatewayErrorCode::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
            GatewayErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayErrorCode::AccessDenied => StatusCode::FORBIDDEN,
            GatewayErrorCode::InternalFault => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Gateway-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GatewayErrorCode::TenantNotFound => "TENANT_NOT_FOUND",
            GatewayErrorCode::UpstreamUnreachable => "UPSTREAM_UNREACHABLE",
            GatewayErrorCode::Unauthorized => "UNAUTHORIZED",
            GatewayErrorCode::AccessDenied => "ACCESS_DENIED",
            GatewayErrorCode::InternalFault => "INTERNAL_FAULT",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: GatewayErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
    /// Machine-readable reason, present on access-denied responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Remediation link, present on access-denied responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_url: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
            reason: None,
            upgrade_url: None,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Gateway-Error header
pub fn json_error_response(
    code: GatewayErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    error_response(ErrorResponse::new(code, message))
}

/// Create the structured access-denied response for the premium gate:
/// reason code plus a remediation link the caller can follow.
pub fn access_denied_response(
    reason: impl Into<String>,
    upgrade_url: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut error = ErrorResponse::new(
        GatewayErrorCode::AccessDenied,
        "This feature requires an upgraded plan",
    );
    error.reason = Some(reason.into());
    error.upgrade_url = Some(upgrade_url.into());
    error_response(error)
}

fn error_response(error: ErrorResponse) -> Response<BoxBody<Bytes, hyper::Error>> {
    let status = error.code.status_code();
    let header = error.code.as_header_value();
    let body = error.to_json();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("X-Gateway-Error", header)
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}
