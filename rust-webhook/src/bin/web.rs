//! pagehook web server.
//!
//! Serves the Messenger webhook, the health check and the local message
//! pipeline; every request is logged to the configured transports.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};

use pagehook::logging::init::{build_logger, exclusion_policy, init_tracing};
use pagehook::web::{self, pipeline_router};
use pagehook::{AppState, Config, Dispatcher, GraphSendClient, RequestLogging};

/// Upper bound on each shutdown drain step.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env();

    let client = reqwest::Client::builder()
        .gzip(true)
        .build()
        .context("Failed to build HTTP client")?;

    // Logger first so startup events reach every transport
    let logger = Arc::new(build_logger(&config, &client));
    let bridge = init_tracing(Arc::clone(&logger), &config);

    info!(
        port = config.port,
        transports = ?logger.transport_names(),
        validation_token_configured = config.fb_validation_token.is_some(),
        signature_verification = web::is_signature_verification_enabled(&config.fb_app_secret),
        "config_loaded"
    );
    if !web::is_signature_verification_enabled(&config.fb_app_secret) {
        warn!("messenger_signature_not_configured");
    }

    let logging = RequestLogging::new(Arc::clone(&logger), exclusion_policy(&config))
        .with_fields(web::request_fields);
    let pipeline = pipeline_router(logging.clone());

    let sender = GraphSendClient::new(
        client,
        config.fb_send_api_url.clone(),
        config.fb_page_access_token.clone(),
        Duration::from_millis(config.request_timeout_ms),
    );
    let dispatcher = Dispatcher::new(pipeline.clone(), Arc::new(sender));

    let port = config.port;
    let state = AppState::new(config, dispatcher);

    // Build the router
    let app = web::router(state, logging).merge(pipeline);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Request records first: their delivery failures feed the bridge.
    let requests_drained = logger.drain(SHUTDOWN_GRACE).await;

    let stats = bridge.stats();
    info!(
        requests_drained,
        requests_in_flight = logger.in_flight(),
        bridge_events = stats.total.load(Ordering::Relaxed),
        bridge_dropped = stats.dropped.load(Ordering::Relaxed),
        "web_server_shutdown_complete"
    );

    if !bridge.drain(SHUTDOWN_GRACE).await {
        warn!("log_bridge_not_drained");
    }

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
