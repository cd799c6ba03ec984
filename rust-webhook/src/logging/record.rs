//! Structured log records and the default/caller field merge.

use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Level;

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Built by the request-logging middleware on response completion.
    Request,
    /// Application or crate diagnostics, usually via the tracing bridge.
    Application,
    /// Reports about failed sink deliveries.
    Transport,
}

/// Default fields captured for every logged HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpFields {
    pub method: String,
    pub status: u16,
    pub url: String,
    #[serde(default)]
    pub ip: Option<String>,
    pub timestamp: String,
    #[serde(rename = "responseTime", default)]
    pub response_time: Option<u64>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

impl HttpFields {
    /// Wire names of the typed fields.
    pub const KEYS: [&'static str; 7] = [
        "method",
        "status",
        "url",
        "ip",
        "timestamp",
        "responseTime",
        "sessionId",
    ];

    fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// An error value captured for the error-reporting sink.
///
/// The backtrace is captured unresolved; symbols are only looked up when a
/// transport renders it on the delivery task.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub class: String,
    pub message: String,
    /// `source()` chain, outermost cause first.
    pub causes: Vec<String>,
    pub backtrace: Option<Arc<Backtrace>>,
}

impl ErrorReport {
    /// Capture an error and its cause chain under `class`.
    pub fn from_error(class: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            class: class.into(),
            message: err.to_string(),
            causes,
            backtrace: Some(Arc::new(Backtrace::force_capture())),
        }
    }

    /// Resolve and render the backtrace.
    pub fn backtrace_text(&self) -> Option<String> {
        self.backtrace.as_ref().map(|bt| bt.to_string())
    }
}

/// One structured log record. Immutable once handed to the fan-out.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub message: Option<String>,
    pub http: Option<HttpFields>,
    pub fields: BTreeMap<String, Value>,
    pub error: Option<ErrorReport>,
    pub origin: Origin,
    pub target: Option<String>,
}

impl LogRecord {
    /// A free-text record.
    pub fn message(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: Some(message.into()),
            http: None,
            fields: BTreeMap::new(),
            error: None,
            origin: Origin::Application,
            target: None,
        }
    }

    /// A request record: `caller` fields are merged over `defaults`.
    pub fn request(level: Level, defaults: HttpFields, caller: Map<String, Value>) -> Self {
        let (http, fields) = merge_fields(defaults, caller);
        Self {
            level,
            message: None,
            http: Some(http),
            fields,
            error: None,
            origin: Origin::Request,
            target: None,
        }
    }

    pub fn with_error(mut self, report: ErrorReport) -> Self {
        self.error = Some(report);
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// All known and extension fields as one JSON object.
    pub fn metadata(&self) -> Map<String, Value> {
        let mut map = self.http.as_ref().map(HttpFields::to_map).unwrap_or_default();
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        map
    }

    /// Look up a field by name, checking typed fields before extensions.
    pub fn field(&self, key: &str) -> Option<Value> {
        if let Some(http) = &self.http {
            if HttpFields::KEYS.contains(&key) {
                return http.to_map().get(key).cloned().filter(|v| !v.is_null());
            }
        }
        self.fields.get(key).cloned()
    }
}

/// Merge caller-supplied fields over the request defaults.
///
/// Caller values win on key collision. A value whose type does not fit the
/// typed field leaves the default in place and is kept as an extension field.
pub fn merge_fields(
    defaults: HttpFields,
    caller: Map<String, Value>,
) -> (HttpFields, BTreeMap<String, Value>) {
    let mut merged = defaults.to_map();
    let mut extra = BTreeMap::new();

    for (key, value) in caller {
        if !HttpFields::KEYS.contains(&key.as_str()) {
            extra.insert(key, value);
            continue;
        }

        let previous = merged.insert(key.clone(), value.clone());
        if serde_json::from_value::<HttpFields>(Value::Object(merged.clone())).is_err() {
            match previous {
                Some(prev) => merged.insert(key.clone(), prev),
                None => merged.remove(&key),
            };
            tracing::debug!(field = %key, "log_field_override_rejected");
            extra.insert(key, value);
        }
    }

    let http = serde_json::from_value(Value::Object(merged)).unwrap_or(defaults);
    (http, extra)
}
