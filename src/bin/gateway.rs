// ============================================================================
// API Gateway Service
// ============================================================================
//
// Single entry point for all client requests. Every request passes CORS,
// access control, rate limiting, the circuit breaker and token verification
// before being forwarded to a weighted backend endpoint.
//
// Health and metrics are served on ADMIN_PORT.
//
// ============================================================================

use anyhow::{Context, Result};
use sky_gateway::clock::SystemClock;
use sky_gateway::config::Config;
use sky_gateway::gateway::{create_admin_router, create_router, GatewayState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing before config so config warnings are visible
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    info!("=== API Gateway Service Starting ===");
    info!("Port: {}", config.port);
    info!("Admin Port: {}", config.admin_port);

    let state = GatewayState::new(&config, Arc::new(SystemClock))?;
    for (route, endpoints) in state.registry.routes() {
        let total_weight: u64 = endpoints.iter().map(|e| u64::from(e.weight)).sum();
        info!(
            route = %route,
            endpoints = endpoints.len(),
            total_weight = total_weight,
            "Route configured"
        );
    }

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .context("Failed to parse bind address")?;
    let admin_addr: SocketAddr = format!("0.0.0.0:{}", config.admin_port)
        .parse()
        .context("Failed to parse admin bind address")?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    let admin_listener = tokio::net::TcpListener::bind(&admin_addr)
        .await
        .context("Failed to bind to admin address")?;

    let admin_app = create_admin_router(state.clone());
    let admin_server = tokio::spawn(async move {
        axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    info!("API Gateway listening on {}", addr);
    info!("Admin endpoints listening on {}", admin_addr);

    // In-flight forwarded requests drain before the server future resolves
    axum::serve(
        listener,
        create_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Failed to start server")?;

    admin_server
        .await
        .context("Admin server task panicked")?
        .context("Admin server failed")?;

    info!("API Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining in-flight requests");
}
