//! Startup wiring: transports from [`Config`], the exclusion policy and the
//! global `tracing` subscriber.

use std::sync::Arc;

use reqwest::Client;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::transport::{AnalyticsTransport, ConsoleTransport, RollbarTransport};
use super::{BridgeHandle, ExclusionPolicy, Logger, TransportLayer};
use crate::Config;

/// Build the logger with every transport the configuration enables.
///
/// The console transport is always present; Rollbar needs `ROLLBAR_TOKEN`
/// and analytics needs `GA_TRACKING_CODE`.
pub fn build_logger(config: &Config, client: &Client) -> Logger {
    let mut logger = Logger::new().with_transport(Arc::new(ConsoleTransport::stdout(
        config.console_log_level,
        config.console_colorize,
    )));

    if let Some(token) = &config.rollbar_token {
        logger = logger.with_transport(Arc::new(RollbarTransport::new(
            client.clone(),
            config.rollbar_endpoint.clone(),
            token.clone(),
            config.rollbar_environment.clone(),
        )));
    }

    if config.ga_tracking_code.is_some() {
        logger = logger.with_transport(Arc::new(AnalyticsTransport::new(
            client.clone(),
            config.ga_endpoint.clone(),
            config.ga_tracking_code.clone(),
        )));
    }

    logger
}

/// Exclusion policy from the configured static prefixes.
pub fn exclusion_policy(config: &Config) -> ExclusionPolicy {
    ExclusionPolicy::with_static_prefixes(config.log_static_prefixes.clone())
}

/// Install the global subscriber: `EnvFilter` (`RUST_LOG`, default `info`),
/// the bridge into `logger`, and optionally raw JSON lines on stdout.
///
/// Must be called from within a Tokio runtime.
pub fn init_tracing(logger: Arc<Logger>, config: &Config) -> BridgeHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (layer, handle) = TransportLayer::new(logger, config.log_channel_buffer);

    let json = config
        .log_json_stdout
        .then(|| fmt::layer().json().flatten_event(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .with(json)
        .init();

    handle
}
