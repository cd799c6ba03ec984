//! Error reporting to Rollbar.
//!
//! Only error-level records are reported. A record carrying an
//! [`ErrorReport`] becomes a `trace` item with frames parsed from the
//! captured backtrace; anything else becomes a `message` item with the
//! record's fields attached as custom data.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{Transport, TransportError};
use crate::logging::{ErrorReport, Level, LogRecord};

pub struct RollbarTransport {
    client: Client,
    endpoint: String,
    access_token: String,
    environment: String,
}

impl RollbarTransport {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        access_token: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            access_token: access_token.into(),
            environment: environment.into(),
        }
    }

    /// Build the item API payload for a record.
    pub fn build_item(&self, record: &LogRecord) -> Value {
        let body = match &record.error {
            Some(report) => trace_body(report),
            None => json!({ "message": { "body": message_text(record) } }),
        };

        json!({
            "access_token": self.access_token,
            "data": {
                "environment": self.environment,
                "level": record.level.as_str(),
                "timestamp": Utc::now().timestamp(),
                "language": "rust",
                "notifier": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "body": body,
                "custom": record.metadata(),
            }
        })
    }
}

#[async_trait]
impl Transport for RollbarTransport {
    fn name(&self) -> &str {
        "rollbar"
    }

    fn min_level(&self) -> Level {
        Level::Error
    }

    async fn deliver(&self, record: &LogRecord) -> Result<(), TransportError> {
        let item = self.build_item(record);
        let resp = self.client.post(&self.endpoint).json(&item).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        debug!(has_trace = record.error.is_some(), "rollbar_item_reported");
        Ok(())
    }
}

fn message_text(record: &LogRecord) -> String {
    if let Some(message) = &record.message {
        return message.clone();
    }
    match &record.http {
        Some(http) => format!("{} {} {}", http.status, http.method, http.url),
        None => String::new(),
    }
}

fn trace_body(report: &ErrorReport) -> Value {
    trace_body_with(report, report.backtrace_text().as_deref())
}

fn trace_body_with(report: &ErrorReport, backtrace: Option<&str>) -> Value {
    let mut frames = backtrace.map(parse_backtrace_frames).unwrap_or_default();

    if frames.is_empty() {
        frames.push(json!({ "filename": "<unknown>", "method": report.class }));
    }

    let mut exception = json!({
        "class": report.class,
        "message": report.message,
    });
    if !report.causes.is_empty() {
        exception["description"] = Value::String(report.causes.join("\ncaused by: "));
    }

    json!({ "trace": { "frames": frames, "exception": exception } })
}

/// Parse `std::backtrace::Backtrace` output into Rollbar frames.
///
/// Rollbar expects the most recent call last, the reverse of the order the
/// backtrace is printed in.
pub fn parse_backtrace_frames(text: &str) -> Vec<Value> {
    let mut frames: Vec<Value> = Vec::new();

    for line in text.lines().map(str::trim) {
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                let mut parts = location.rsplitn(3, ':');
                let colno = parts.next().and_then(|c| c.parse::<u64>().ok());
                let lineno = parts.next().and_then(|l| l.parse::<u64>().ok());
                match (parts.next(), lineno, colno) {
                    (Some(file), Some(lineno), Some(colno)) => {
                        frame["filename"] = Value::String(file.to_string());
                        frame["lineno"] = json!(lineno);
                        frame["colno"] = json!(colno);
                    }
                    _ => frame["filename"] = Value::String(location.to_string()),
                }
            }
            continue;
        }

        if let Some((index, method)) = line.split_once(": ") {
            if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
                frames.push(json!({ "filename": "<unknown>", "method": method }));
            }
        }
    }

    frames.reverse();
    frames
}
