//! Gateway process
//!
//! Reads its configuration from the environment, connects the relay in
//! the background and serves the HTTP surface. Until the broker is up,
//! calls go directly to the upstream.

use gx_graphql_gateway::{
    AmqpConnector, BrokerConnector, BrokerKind, GatewayConfig, HttpUpstream, MemoryConnector,
    RelayClient,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = GatewayConfig::from_env()?;

    let upstream = Arc::new(HttpUpstream::new(config.proasig_url.clone())?);
    let connector: Arc<dyn BrokerConnector> = match config.broker {
        BrokerKind::Amqp => Arc::new(AmqpConnector::new(config.rabbitmq_url.clone())),
        BrokerKind::Memory => {
            warn!("Using the in-process broker; messages do not survive a restart");
            Arc::new(MemoryConnector::new())
        }
    };
    let upstream_url = upstream.url().to_string();
    let client = Arc::new(RelayClient::new(
        connector.clone(),
        upstream,
        config.relay.clone(),
    ));

    // Connect in the background so HTTP is served while the broker retries
    let relay = client.clone();
    tokio::spawn(async move {
        if let Err(e) = relay.connect().await {
            error!(error = %e, "Relay unavailable, serving through direct upstream calls");
        }
    });

    let app = gx_graphql_gateway::router(client.clone(), config.frontend_url.as_deref());
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;

    info!(
        addr = %addr,
        broker = %connector.describe(),
        upstream = %upstream_url,
        "Gateway listening"
    );
    for backend in config.backends() {
        info!(name = backend.name, url = %backend.url, "Backend configured");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    client.shutdown().await?;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
