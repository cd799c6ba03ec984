//! Request-logging middleware.
//!
//! Times each request, builds a [`LogRecord`] when the response is ready
//! and hands it to the [`Logger`] on a background task, so sink latency
//! never reaches the client.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, OriginalUri, Request, State},
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::{ExclusionPolicy, HttpFields, Level, LogRecord, Logger, Timing};

/// Extra fields a handler attaches to its response for the request log.
#[derive(Debug, Clone, Default)]
pub struct LogFields(pub Map<String, Value>);

impl LogFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

/// Session identity, set as a request or response extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub String);

/// What the middleware saw of the request before handing it on.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub ip: Option<String>,
    pub session_id: Option<String>,
}

/// Caller-supplied fields computed from the request and response.
pub type RequestFieldsFn =
    dyn Fn(&RequestSnapshot, &Response) -> Map<String, Value> + Send + Sync;

/// State for [`log_requests`].
#[derive(Clone)]
pub struct RequestLogging {
    logger: Arc<Logger>,
    policy: Arc<ExclusionPolicy>,
    fields: Option<Arc<RequestFieldsFn>>,
}

impl RequestLogging {
    pub fn new(logger: Arc<Logger>, policy: ExclusionPolicy) -> Self {
        Self {
            logger,
            policy: Arc::new(policy),
            fields: None,
        }
    }

    pub fn with_fields<F>(mut self, fields: F) -> Self
    where
        F: Fn(&RequestSnapshot, &Response) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.fields = Some(Arc::new(fields));
        self
    }

    /// Build the record for a finished request.
    pub fn build_record(
        &self,
        request: &RequestSnapshot,
        response: &Response,
        timing: Timing,
    ) -> LogRecord {
        let session_id = response
            .extensions()
            .get::<SessionId>()
            .map(|s| s.0.clone())
            .or_else(|| request.session_id.clone());

        let defaults = HttpFields {
            method: request.method.to_string(),
            status: response.status().as_u16(),
            url: request.url.clone(),
            ip: request.ip.clone(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            response_time: timing.response_time_ms(),
            session_id,
        };

        let mut caller = match &self.fields {
            Some(fields) => fields(request, response),
            None => Map::new(),
        };
        if let Some(LogFields(extra)) = response.extensions().get::<LogFields>() {
            for (key, value) in extra {
                caller.insert(key.clone(), value.clone());
            }
        }

        LogRecord::request(Level::Info, defaults, caller)
    }
}

/// Axum middleware; install with
/// `axum::middleware::from_fn_with_state(logging, log_requests)`.
pub async fn log_requests(
    State(logging): State<RequestLogging>,
    request: Request,
    next: Next,
) -> Response {
    let url = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.to_string())
        .unwrap_or_else(|| request.uri().to_string());
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    if logging.policy.skips(&url, user_agent) {
        return next.run(request).await;
    }

    let mut timing = Timing::started();
    let snapshot = RequestSnapshot {
        method: request.method().clone(),
        url,
        headers: request.headers().clone(),
        ip: client_ip(&request),
        session_id: request.extensions().get::<SessionId>().map(|s| s.0.clone()),
    };

    let response = next.run(request).await;
    timing.mark_end();

    let record = logging.build_record(&snapshot, &response, timing);
    logging.logger.emit(record);

    response
}

/// First `x-forwarded-for` hop, else the peer address.
fn client_ip(request: &Request) -> Option<String> {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}
