//! Google Analytics measurement-protocol transport.
//!
//! Request records become either a pageview hit or, when an `action` is
//! present, an event hit plus response-time timing hits. All hits for one
//! record are sent in a single batch request.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::form_urlencoded;

use super::{Transport, TransportError};
use crate::logging::{Level, LogRecord};

/// Category used for every timing hit.
const TIMING_CATEGORY: &str = "Response Time";

/// An extra timing reported alongside the total response time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NamedTiming {
    pub name: String,
    pub time: u64,
}

/// Per-record analytics fields, produced by the transport's field function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsFields {
    /// Visitor identity (`cid`/`uid`).
    pub uuid: Option<String>,
    pub tracking_code: Option<String>,
    pub category: Option<String>,
    pub action: Option<String>,
    pub label: Option<String>,
    pub value: Option<i64>,
    pub timings: Vec<NamedTiming>,
}

impl AnalyticsFields {
    /// Read the conventional fields from a record: `uuid` (falling back to
    /// the session id), `category`, `action`, `label`, `value` and
    /// `timings` as an array of `{name, time}` objects.
    pub fn from_record(record: &LogRecord, tracking_code: Option<&str>) -> Self {
        let text = |key: &str| match record.fields.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let timings = match record.fields.get("timings") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => match serde_json::from_value::<Vec<NamedTiming>>(value.clone()) {
                Ok(timings) => timings,
                Err(_) => {
                    warn!("analytics_timings_not_an_array");
                    Vec::new()
                }
            },
        };

        Self {
            uuid: text("uuid").or_else(|| record.http.as_ref().and_then(|h| h.session_id.clone())),
            tracking_code: tracking_code.map(str::to_string),
            category: text("category"),
            action: text("action"),
            label: text("label"),
            value: record.fields.get("value").and_then(Value::as_i64),
            timings,
        }
    }
}

pub type AnalyticsFieldsFn = dyn Fn(&LogRecord) -> AnalyticsFields + Send + Sync;

pub struct AnalyticsTransport {
    client: Client,
    endpoint: String,
    fields: Arc<AnalyticsFieldsFn>,
}

impl AnalyticsTransport {
    /// Transport using [`AnalyticsFields::from_record`] with a fixed
    /// tracking code.
    pub fn new(client: Client, endpoint: impl Into<String>, tracking_code: Option<String>) -> Self {
        let fields = move |record: &LogRecord| {
            AnalyticsFields::from_record(record, tracking_code.as_deref())
        };
        Self::with_fields_fn(client, endpoint, Arc::new(fields))
    }

    pub fn with_fields_fn(
        client: Client,
        endpoint: impl Into<String>,
        fields: Arc<AnalyticsFieldsFn>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            fields,
        }
    }
}

#[async_trait]
impl Transport for AnalyticsTransport {
    fn name(&self) -> &str {
        "analytics"
    }

    fn min_level(&self) -> Level {
        Level::Info
    }

    async fn deliver(&self, record: &LogRecord) -> Result<(), TransportError> {
        // Only plain info-level request records are hits; site checkers
        // use HEAD and must not count as page views.
        let Some(http) = &record.http else {
            return Ok(());
        };
        if record.level != Level::Info || http.method.eq_ignore_ascii_case("HEAD") {
            return Ok(());
        }

        let fields = (self.fields)(record);
        let hits = build_hits(&fields, record)?;
        let body = hits.join("\n");

        let resp = self.client.post(&self.endpoint).body(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        debug!(hits = hits.len(), url = %http.url, "analytics_hits_sent");
        Ok(())
    }
}

/// Encode the measurement-protocol hits for one record.
///
/// Fails with [`TransportError::Configuration`] when the visitor id or the
/// tracking code is missing.
pub fn build_hits(
    fields: &AnalyticsFields,
    record: &LogRecord,
) -> Result<Vec<String>, TransportError> {
    let uuid = fields.uuid.as_deref().ok_or_else(|| {
        TransportError::Configuration("analytics requires a visitor id".to_string())
    })?;
    let tracking_code = fields.tracking_code.as_deref().ok_or_else(|| {
        TransportError::Configuration("analytics requires a tracking code".to_string())
    })?;

    let page = record.http.as_ref().map(|h| h.url.as_str()).unwrap_or("/");
    let base = [("v", "1"), ("tid", tracking_code), ("cid", uuid), ("uid", uuid)];
    let encode = |params: &[(&str, &str)]| encode_hit(&base, params);

    let Some(action) = fields.action.as_deref() else {
        return Ok(vec![encode(&[("t", "pageview"), ("dp", page)])]);
    };

    let mut event = vec![("t", "event"), ("ea", action), ("dp", page)];
    if let Some(category) = fields.category.as_deref() {
        event.push(("ec", category));
    }
    if let Some(label) = fields.label.as_deref() {
        event.push(("el", label));
    }
    let value = fields.value.map(|v| v.to_string());
    if let Some(value) = value.as_deref() {
        event.push(("ev", value));
    }

    let mut hits = vec![encode(&event)];

    let total = record.http.as_ref().and_then(|h| h.response_time);
    if let Some(total) = total {
        let total = total.to_string();
        hits.push(encode(&[
            ("t", "timing"),
            ("utc", TIMING_CATEGORY),
            ("utv", "Total Time"),
            ("utt", total.as_str()),
        ]));
    }

    for timing in &fields.timings {
        let time = timing.time.to_string();
        hits.push(encode(&[
            ("t", "timing"),
            ("utc", TIMING_CATEGORY),
            ("utv", timing.name.as_str()),
            ("utt", time.as_str()),
        ]));
    }

    Ok(hits)
}

fn encode_hit(base: &[(&str, &str)], params: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in base {
        serializer.append_pair(key, value);
    }
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::HttpFields;
    use serde_json::{json, Map};

    fn record(method: &str, caller: Value) -> LogRecord {
        let caller = match caller {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        LogRecord::request(
            Level::Info,
            HttpFields {
                method: method.to_string(),
                status: 200,
                url: "/".to_string(),
                ip: None,
                timestamp: "2024-01-01T00:00:00.000Z".to_string(),
                response_time: Some(41),
                session_id: Some("visitor-1".to_string()),
            },
            caller,
        )
    }

    fn unreachable(tracking_code: Option<&str>) -> AnalyticsTransport {
        AnalyticsTransport::new(
            Client::new(),
            "http://127.0.0.1:1/batch",
            tracking_code.map(str::to_string),
        )
    }

    #[test]
    fn test_pageview_without_action() {
        let rec = record("GET", json!({}));
        let fields = AnalyticsFields::from_record(&rec, Some("UA-1"));
        let hits = build_hits(&fields, &rec).unwrap();
        assert_eq!(hits, vec!["v=1&tid=UA-1&cid=visitor-1&uid=visitor-1&t=pageview&dp=%2F"]);
    }

    #[test]
    fn test_event_with_timings() {
        let rec = record(
            "POST",
            json!({
                "category": "sms",
                "action": "stop lookup",
                "label": "N",
                "value": 3,
                "timings": [{"name": "MuniTime", "time": 1023}]
            }),
        );
        let fields = AnalyticsFields::from_record(&rec, Some("UA-1"));
        let hits = build_hits(&fields, &rec).unwrap();

        assert_eq!(hits.len(), 3);
        assert!(hits[0].contains("t=event"));
        assert!(hits[0].contains("ea=stop+lookup"));
        assert!(hits[0].contains("ec=sms"));
        assert!(hits[0].contains("ev=3"));
        assert!(hits[1].contains("utv=Total+Time&utt=41"));
        assert!(hits[2].contains("utv=MuniTime&utt=1023"));
    }

    #[test]
    fn test_uuid_field_overrides_session() {
        let rec = record("GET", json!({"uuid": "explicit"}));
        let fields = AnalyticsFields::from_record(&rec, Some("UA-1"));
        assert_eq!(fields.uuid.as_deref(), Some("explicit"));
    }

    #[test]
    fn test_bad_timings_are_ignored() {
        let rec = record("POST", json!({"action": "a", "timings": "soon"}));
        let fields = AnalyticsFields::from_record(&rec, Some("UA-1"));
        assert!(fields.timings.is_empty());
    }

    #[test]
    fn test_missing_tracking_code_is_configuration_error() {
        let rec = record("GET", json!({}));
        let fields = AnalyticsFields::from_record(&rec, None);
        assert!(matches!(
            build_hits(&fields, &rec),
            Err(TransportError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_identity_makes_no_call() {
        let mut rec = record("GET", json!({}));
        if let Some(http) = rec.http.as_mut() {
            http.session_id = None;
        }
        // The endpoint is unreachable, so reaching the network would be an Http error.
        let err = unreachable(Some("UA-1")).deliver(&rec).await.unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_head_and_non_info_records_are_ignored() {
        let transport = unreachable(Some("UA-1"));
        transport.deliver(&record("HEAD", json!({}))).await.unwrap();

        let mut warn = record("GET", json!({}));
        warn.level = Level::Warn;
        transport.deliver(&warn).await.unwrap();

        transport
            .deliver(&LogRecord::message(Level::Info, "not a request"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_network_failure_is_reported() {
        let err = unreachable(Some("UA-1"))
            .deliver(&record("GET", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
    }
}
