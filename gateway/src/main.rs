//! VAHTI gateway binary
//!
//! Loads configuration from the environment, wires the service together,
//! runs the startup verification pass, and serves the HTTP API until
//! SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::RngCore;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vahti_gateway::config::{Config, LogFormat};
use vahti_gateway::notify::DiscoveryBus;
use vahti_gateway::registration::DiscoveryService;
use vahti_gateway::scheduler::JobScheduler;
use vahti_gateway::server;
use vahti_gateway::store::MemoryStore;
use vahti_gateway::token::TokenService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    info!(
        http_addr = %config.http_addr,
        base_url = %config.base_url,
        ping_period_secs = config.ping_period.as_secs(),
        "Starting VAHTI"
    );

    let key = config.token_key.clone().unwrap_or_else(|| {
        // Tokens will not survive a restart; plugins re-register anyway
        info!("No VAHTI_TOKEN_KEY configured, generating an ephemeral signing key");
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        key.to_vec()
    });
    let tokens = TokenService::new(key, config.base_url.to_string(), config.token_ttl);

    let http = reqwest::Client::builder()
        .timeout(config.callback_timeout)
        .build()?;

    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(JobScheduler::new());
    let service = Arc::new(DiscoveryService::new(
        store,
        tokens,
        Arc::clone(&scheduler),
        DiscoveryBus::new(),
        http,
        config.base_url.clone(),
        config.ping_period,
        config.agent_proxy.clone(),
    ));

    if let Some(realm) = &config.builtin_realm {
        service.ensure_builtin_realm(realm)?;
    }
    service.startup();

    let app = server::router(Arc::clone(&service));
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    scheduler.shutdown();
    info!("VAHTI shutdown complete");
    Ok(())
}

/// Initialise the tracing subscriber based on config.
fn init_tracing(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.log_format {
        LogFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Pretty => {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
