//! Caller authentication for the JSON gateway surface
//!
//! Sessions are JWTs issued at login by the account service. Besides the
//! caller identity and plan, a token may carry per-tenant bearer credentials
//! (issued when the caller connects a site) which take precedence over the
//! configured fallback credential when forwarding.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Caller identity
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    /// Billing plan, consulted by the premium gate
    #[serde(default)]
    pub plan: String,
    /// Per-tenant bearer credentials keyed by slug
    #[serde(default)]
    pub site_tokens: HashMap<String, String>,
}

impl Claims {
    /// The caller's credential for one tenant, if one was issued at login
    pub fn site_credential(&self, slug: &str) -> Option<&str> {
        self.site_tokens.get(slug).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub token_expiry_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: uuid::Uuid::new_v4().to_string(),
            token_expiry_hours: 24,
        }
    }
}

#[derive(Clone)]
pub struct AuthManager {
    config: Arc<AuthConfig>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthManager {
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config: Arc::new(config),
            encoding_key,
            decoding_key,
        }
    }

    pub fn create_token(
        &self,
        user_id: &str,
        plan: &str,
        site_tokens: HashMap<String, String>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.config.token_expiry_hours);

        let claims = Claims {
            sub: user_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            plan: plan.to_string(),
            site_tokens,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
    }

    pub fn verify_token(&self, token: &str) -> Result<TokenData<Claims>, jsonwebtoken::errors::Error> {
        let validation = Validation::default();
        decode::<Claims>(token, &self.decoding_key, &validation)
    }

    pub fn extract_token_from_header(&self, auth_header: &str) -> Option<String> {
        auth_header.strip_prefix("Bearer ").map(|s| s.to_string())
    }
}
