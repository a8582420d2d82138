//! Kalshi Feed Relay server
//!
//! Maintains one authenticated connection to the Kalshi real-time feed and
//! republishes classified events to local WebSocket subscribers.

mod routes;

use axum::{
    http::{header, Method},
    Router,
};
use relay_kalshi::{EventRouter, FeedCredentials, KalshiTransport, Signer, UpstreamClient};
use relay_services::{register_feed_handlers, BroadcastHub};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,relay_api=debug")),
        )
        .init();

    info!("Starting Kalshi Feed Relay");

    // Missing credentials are fatal here; everything downstream of this
    // point recovers on its own
    let credentials = FeedCredentials::from_env()?;
    let signer = Signer::new(credentials)?;

    let router = Arc::new(EventRouter::new());
    let upstream = Arc::new(UpstreamClient::new(
        signer,
        KalshiTransport::new(),
        Arc::clone(&router),
    ));
    let hub = Arc::new(BroadcastHub::new(Arc::clone(&upstream)));
    register_feed_handlers(&hub, &router).await;

    // The feed connects lazily on the first subscribe request, so startup
    // never blocks on the upstream
    info!("Upstream feed will connect on first subscription");

    let state = AppState { hub };

    // Configure CORS for local frontends
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    // Build router
    let app = Router::new()
        .merge(routes::health::routes())
        .merge(routes::ws::routes())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = std::env::var("RELAY_BIND_ADDR")
        .ok()
        .and_then(|a| a.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8000)));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(upstream))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then stop the upstream client so no pending reconnect
/// can reopen the feed while the server drains
async fn shutdown_signal(upstream: Arc<UpstreamClient>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutting down");
    upstream.shutdown().await;
}
