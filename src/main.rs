use sitegate::auth::{AuthConfig, AuthManager};
use sitegate::config::Config;
use sitegate::directory::{FileStore, PortDirectory};
use sitegate::forward::JsonForwarder;
use sitegate::premium::PremiumMiddleware;
use sitegate::server::{GatewayServer, GatewayState};
use sitegate::tunnel::{TunnelProxy, TunnelTable};
use sitegate::{PKG_NAME, VERSION};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sitegate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");
    print_startup_banner(&config);

    // Port directory, owned by the process and injected everywhere
    let directory = PortDirectory::new(
        Box::new(FileStore::new(&config.directory.path)),
        config.directory.max_staleness(),
    );

    // Session auth; a random secret means sessions die with the process
    let auth_secret = config.auth.secret.clone().unwrap_or_else(|| {
        let secret = uuid::Uuid::new_v4().to_string();
        info!("Generated session signing secret (configure auth.secret to set a fixed value)");
        secret
    });
    let auth = AuthManager::new(AuthConfig {
        secret: auth_secret,
        token_expiry_hours: config.auth.token_expiry_hours,
    });

    // Register a tunnel route for every provisioned tenant at startup
    let table = Arc::new(TunnelTable::new());
    match directory.snapshot() {
        Ok(snapshot) => register_tunnels(&table, &snapshot, config.tunnel.allow_websocket),
        Err(e) => {
            warn!(error = %e, "Could not read port directory at startup, no tunnels registered");
        }
    }

    let state = Arc::new(GatewayState {
        directory,
        forwarder: JsonForwarder::new(&config.gateway),
        tunnels: TunnelProxy::new(Arc::clone(&table), &config.tunnel),
        auth,
        premium: PremiumMiddleware::from_config(&config.premium),
        fallback_token: config.gateway.fallback_token.clone(),
    });

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let server = GatewayServer::new(bind_addr, Arc::clone(&state), shutdown_rx.clone());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Gateway server error");
        }
    });

    // Wait for shutdown (Ctrl+C or SIGTERM) or directory refresh (SIGHUP)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("Failed to install SIGHUP handler");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT (Ctrl+C), shutting down...");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, refreshing port directory...");
                    match state.directory.refresh() {
                        Ok(snapshot) => {
                            info!(tenants = snapshot.len(), "Port directory refreshed");
                            register_tunnels(&table, &snapshot, config.tunnel.allow_websocket);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to refresh port directory");
                        }
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown and wait for the server to stop (with timeout)
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

/// Bind a standing tunnel route for every directory entry. Registration is
/// append/overwrite-only: tenants removed from the directory keep their route
/// until restart.
fn register_tunnels(
    table: &Arc<TunnelTable>,
    snapshot: &std::collections::HashMap<String, u16>,
    allow_websocket: bool,
) {
    for (slug, port) in snapshot {
        let origin = format!("http://127.0.0.1:{}", port);
        if let Err(e) = table.register(slug.clone(), &origin, allow_websocket) {
            error!(slug, origin, error = %e, "Failed to register tunnel route");
        }
    }
    info!(routes = table.len(), "Tunnel routes active");
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting gateway");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        "Server configuration"
    );
    info!(
        path = %config.directory.path,
        max_staleness_ms = config.directory.max_staleness_ms,
        "Port directory"
    );
    info!(
        api_namespace = %config.gateway.api_namespace,
        upstream_timeout_secs = config.gateway.upstream_timeout_secs,
        fallback_token = config.gateway.fallback_token.is_some(),
        "JSON forwarding"
    );
    info!(
        allow_websocket = config.tunnel.allow_websocket,
        insecure_skip_verify = config.tunnel.insecure_skip_verify,
        "Tunnel settings"
    );
    if !config.premium.gated_paths.is_empty() {
        info!(
            gated_paths = ?config.premium.gated_paths,
            plans = ?config.premium.plans,
            "Premium gate enabled"
        );
    }
}
