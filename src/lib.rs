//! Sitegate - a multi-tenant HTTP gateway for hosted sites
//!
//! This library provides a gateway that:
//! - Resolves tenant slugs to per-site backend ports via a persisted directory
//! - Forwards JSON API requests to the right backend with a bearer credential
//! - Maintains standing tunnel routes per tenant, WebSocket upgrades included
//! - Authenticates callers on the JSON surface with JWT sessions
//! - Gates premium features with a structured access-denied response

pub mod auth;
pub mod config;
pub mod content;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod forward;
pub mod mailer;
pub mod premium;
pub mod server;
pub mod tunnel;

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
