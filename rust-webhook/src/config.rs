//! Configuration module for environment variable parsing.
//!
//! All settings are read once at startup; nothing here is reloaded at runtime.

use std::env;
use tracing::warn;

use crate::logging::Level;

/// Default Messenger Send API endpoint.
pub const DEFAULT_SEND_API_URL: &str = "https://graph.facebook.com/v2.6/me/messages";

/// Default Rollbar item endpoint.
pub const DEFAULT_ROLLBAR_ENDPOINT: &str = "https://api.rollbar.com/api/1/item/";

/// Default Google Analytics batch endpoint.
pub const DEFAULT_ANALYTICS_ENDPOINT: &str = "https://www.google-analytics.com/batch";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Web Server Configuration
    // =========================================================================

    /// Port for the web server to listen on
    pub port: u16,

    /// Token echoed back during the Messenger subscription handshake
    pub fb_validation_token: Option<String>,

    /// Page access token sent with every Send API call
    pub fb_page_access_token: String,

    /// App secret for `x-hub-signature` verification
    pub fb_app_secret: Option<String>,

    /// Messenger Send API URL
    pub fb_send_api_url: String,

    /// Outbound HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,

    // =========================================================================
    // Logging Configuration
    // =========================================================================

    /// Rollbar server-side access token; the sink is disabled without it
    pub rollbar_token: Option<String>,

    /// Rollbar item API endpoint
    pub rollbar_endpoint: String,

    /// Environment name reported with every Rollbar item
    pub rollbar_environment: String,

    /// Google Analytics tracking code; the sink is disabled without it
    pub ga_tracking_code: Option<String>,

    /// Google Analytics batch endpoint
    pub ga_endpoint: String,

    /// Most verbose level printed by the console sink
    pub console_log_level: Level,

    /// Whether the console sink colours the level tag
    pub console_colorize: bool,

    /// URL prefixes that are never request-logged
    pub log_static_prefixes: Vec<String>,

    /// Capacity of the tracing bridge channel
    pub log_channel_buffer: usize,

    /// Also print raw tracing events as JSON lines
    pub log_json_stdout: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),

            fb_validation_token: non_empty("FB_VALIDATION_TOKEN"),

            fb_page_access_token: env::var("FB_PAGE_ACCESS_TOKEN").unwrap_or_default(),

            fb_app_secret: non_empty("FB_APP_SECRET"),

            fb_send_api_url: env::var("FB_SEND_API_URL")
                .unwrap_or_else(|_| DEFAULT_SEND_API_URL.to_string()),

            request_timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),

            rollbar_token: non_empty("ROLLBAR_TOKEN"),

            rollbar_endpoint: env::var("ROLLBAR_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_ROLLBAR_ENDPOINT.to_string()),

            rollbar_environment: env::var("ROLLBAR_ENVIRONMENT")
                .unwrap_or_else(|_| "production".to_string()),

            ga_tracking_code: non_empty("GA_TRACKING_CODE"),

            ga_endpoint: env::var("GA_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_ANALYTICS_ENDPOINT.to_string()),

            console_log_level: parse_level("CONSOLE_LOG_LEVEL", Level::Debug),

            console_colorize: parse_bool("CONSOLE_COLORIZE", true),

            log_static_prefixes: parse_csv("LOG_STATIC_PREFIXES").unwrap_or_else(|| {
                vec![
                    "/css".to_string(),
                    "/javascripts".to_string(),
                    "/img".to_string(),
                ]
            }),

            log_channel_buffer: env::var("LOG_CHANNEL_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024),

            log_json_stdout: parse_bool("LOG_JSON_STDOUT", false),
        }
    }
}

/// Read a variable, treating blank values as unset.
fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a boolean flag such as "true", "1" or "no".
fn parse_bool(name: &str, default: bool) -> bool {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid boolean, using default");
            default
        }
    }
}

/// Parse a severity name like "info" or "debug".
fn parse_level(name: &str, default: Level) -> Level {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    raw.parse().unwrap_or_else(|_| {
        warn!(env_var = name, value = %raw, "Invalid log level, using default");
        default
    })
}

/// Parse a comma-separated list of strings.
fn parse_csv(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}
