//! Premium-access gate
//!
//! Sibling middleware for the JSON surface: certain sub-paths are gated on
//! the caller's plan, and a denial yields the structured access-denied
//! response (reason code plus remediation link). The forwarding core itself
//! does not depend on this.

use crate::auth::Claims;
use crate::config::PremiumConfig;

/// Answers "may this caller access premium features"
pub trait PremiumGate: Send + Sync {
    fn allows(&self, claims: &Claims) -> bool;
}

/// Gate backed by the caller's billing plan claim
pub struct PlanGate {
    allowed_plans: Vec<String>,
}

impl PlanGate {
    pub fn new(allowed_plans: Vec<String>) -> Self {
        Self { allowed_plans }
    }
}

impl PremiumGate for PlanGate {
    fn allows(&self, claims: &Claims) -> bool {
        self.allowed_plans.iter().any(|p| p == &claims.plan)
    }
}

/// The middleware decision for one request
pub struct PremiumMiddleware {
    gate: Box<dyn PremiumGate>,
    gated_paths: Vec<String>,
    upgrade_url: String,
}

/// Reason code carried in denial responses
pub const REASON_PREMIUM_REQUIRED: &str = "premium_required";

impl PremiumMiddleware {
    pub fn from_config(config: &PremiumConfig) -> Self {
        Self {
            gate: Box::new(PlanGate::new(config.plans.clone())),
            gated_paths: config.gated_paths.clone(),
            upgrade_url: config.upgrade_url.clone(),
        }
    }

    pub fn with_gate(gate: Box<dyn PremiumGate>, gated_paths: Vec<String>, upgrade_url: String) -> Self {
        Self {
            gate,
            gated_paths,
            upgrade_url,
        }
    }

    pub fn upgrade_url(&self) -> &str {
        &self.upgrade_url
    }

    /// Whether this sub-path is behind the gate at all
    pub fn is_gated(&self, sub_path: &str) -> bool {
        let sub_path = sub_path.trim_start_matches('/');
        self.gated_paths
            .iter()
            .any(|prefix| sub_path.starts_with(prefix.as_str()))
    }

    /// True when the request may proceed: either the path is ungated or the
    /// caller passes the gate.
    pub fn permits(&self, claims: &Claims, sub_path: &str) -> bool {
        !self.is_gated(sub_path) || self.gate.allows(claims)
    }
}
