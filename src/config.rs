use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the gateway
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Inbound server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Port directory configuration
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// JSON forwarding configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Tunnel (full reverse-proxy) configuration
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Session authentication configuration
    #[serde(default)]
    pub auth: AuthSettings,

    /// Premium gate configuration
    #[serde(default)]
    pub premium: PremiumConfig,

    /// Outbound email configuration (optional)
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listen port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryConfig {
    /// Path to the slug -> port JSON document maintained by the provisioner.
    /// The file not existing yet is a valid startup state.
    #[serde(default = "default_directory_path")]
    pub path: String,

    /// How stale a cached directory snapshot may get before re-reading (ms)
    #[serde(default = "default_directory_staleness_ms")]
    pub max_staleness_ms: u64,
}

impl DirectoryConfig {
    pub fn max_staleness(&self) -> Duration {
        Duration::from_millis(self.max_staleness_ms)
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            path: default_directory_path(),
            max_staleness_ms: default_directory_staleness_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// API namespace segment inserted between the origin and the sub-path
    #[serde(default = "default_api_namespace")]
    pub api_namespace: String,

    /// Process-wide fallback bearer credential, used when the caller has no
    /// per-tenant credential of their own
    pub fallback_token: Option<String>,

    /// Deadline for each upstream call in seconds (default: 30).
    /// Expiry is reported as upstream-unreachable.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    /// Maximum idle connections per backend host (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

impl GatewayConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_namespace: default_api_namespace(),
            fallback_token: None,
            upstream_timeout_secs: default_upstream_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TunnelConfig {
    /// Allow WebSocket upgrades through tunnel routes (default: true)
    #[serde(default = "default_true")]
    pub allow_websocket: bool,

    /// Skip certificate validation toward https origins. Development only;
    /// validation is on by default and the opt-out is logged loudly.
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Deadline for each non-upgrade relayed request in seconds (default: 30)
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,
}

impl TunnelConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            allow_websocket: true,
            insecure_skip_verify: false,
            upstream_timeout_secs: default_upstream_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthSettings {
    /// JWT signing secret. If not set, a random secret is generated at
    /// startup (sessions then do not survive restarts).
    pub secret: Option<String>,

    /// Session lifetime in hours (default: 24)
    #[serde(default = "default_token_expiry_hours")]
    pub token_expiry_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PremiumConfig {
    /// Sub-path prefixes on the JSON surface that require a premium plan
    #[serde(default)]
    pub gated_paths: Vec<String>,

    /// Plans that pass the gate (default: ["premium", "pro"])
    #[serde(default = "default_premium_plans")]
    pub plans: Vec<String>,

    /// Remediation link included in access-denied responses
    #[serde(default = "default_upgrade_url")]
    pub upgrade_url: String,
}

impl Default for PremiumConfig {
    fn default() -> Self {
        Self {
            gated_paths: Vec::new(),
            plans: default_premium_plans(),
            upgrade_url: default_upgrade_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
        Ok(config)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_directory_path() -> String {
    "./site_ports.json".to_string()
}

fn default_directory_staleness_ms() -> u64 {
    2000
}

fn default_api_namespace() -> String {
    "wp-json/headless/v1".to_string()
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_true() -> bool {
    true
}

fn default_token_expiry_hours() -> i64 {
    24
}

fn default_premium_plans() -> Vec<String> {
    vec!["premium".to_string(), "pro".to_string()]
}

fn default_upgrade_url() -> String {
    "https://example.com/account/upgrade".to_string()
}

fn default_smtp_port() -> u16 {
    587
}
