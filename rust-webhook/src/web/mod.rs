//! HTTP surface: the Messenger webhook, the health check and the local
//! message pipeline.
//!
//! Every route runs behind [`log_requests`](crate::logging::log_requests),
//! so each request produces one structured record once its response is ready.

pub mod handlers;
pub mod pipeline;
pub mod signature;

use axum::{http::header, response::Response, routing::get, Router};
use serde_json::{Map, Value};
use tower_http::trace::TraceLayer;

use crate::logging::{log_requests, RequestLogging, RequestSnapshot};

pub use handlers::{
    health, receive_webhook, verify_webhook, AppState, HealthResponse, VerifyParams,
    WebhookResponse,
};
pub use pipeline::pipeline_router;
pub use signature::{
    configured_secret, is_signature_verification_enabled, verify_request_signature,
    AuthenticationError,
};

/// Webhook and health routes with request logging installed.
pub fn router(state: AppState, logging: RequestLogging) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .layer(axum::middleware::from_fn_with_state(logging, log_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Fields added to every request record: the caller's user agent and
/// whether the request carried a Messenger signature.
pub fn request_fields(request: &RequestSnapshot, _response: &Response) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(agent) = request
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
    {
        fields.insert("userAgent".to_string(), Value::from(agent));
    }
    if request.url.starts_with("/webhook") {
        let signed = request.headers.contains_key(signature::SIGNATURE_256_HEADER)
            || request.headers.contains_key(signature::SIGNATURE_HEADER);
        fields.insert("signed".to_string(), Value::from(signed));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{ExclusionPolicy, Logger};
    use crate::messenger::{Dispatcher, ReplySender, SendError, SyntheticMessage};
    use crate::Config;
    use async_trait::async_trait;
    use axum::{
        body::{self, Body},
        http::{Request, StatusCode},
        routing::post,
        Json,
    };
    use hmac::{Hmac, Mac};
    use serde_json::{json, Value};
    use sha1::Sha1;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    #[derive(Default)]
    struct MockSender {
        fail_for: HashSet<String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ReplySender for MockSender {
        async fn send(&self, recipient_id: &str, text: &str) -> Result<(), SendError> {
            self.calls
                .lock()
                .unwrap()
                .push((recipient_id.to_string(), text.to_string()));
            if self.fail_for.contains(recipient_id) {
                Err(SendError::Status {
                    status: 400,
                    body: "{}".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn test_config(app_secret: Option<&str>) -> Config {
        Config {
            port: 0,
            fb_validation_token: Some("T1".to_string()),
            fb_page_access_token: "page-token".to_string(),
            fb_app_secret: app_secret.map(str::to_string),
            fb_send_api_url: "http://127.0.0.1:1/me/messages".to_string(),
            request_timeout_ms: 1000,
            rollbar_token: None,
            rollbar_endpoint: String::new(),
            rollbar_environment: "test".to_string(),
            ga_tracking_code: None,
            ga_endpoint: String::new(),
            console_log_level: crate::logging::Level::Error,
            console_colorize: false,
            log_static_prefixes: Vec::new(),
            log_channel_buffer: 16,
            log_json_stdout: false,
        }
    }

    fn app(app_secret: Option<&str>, sender: Arc<MockSender>) -> Router {
        let logging = RequestLogging::new(Arc::new(Logger::new()), ExclusionPolicy::default());
        let pipeline = Router::new().route(
            "/",
            post(|Json(msg): Json<SyntheticMessage>| async move { format!("echo {}", msg.body) }),
        );
        let state = AppState::new(test_config(app_secret), Dispatcher::new(pipeline, sender));
        router(state, logging)
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn post_webhook(body: &Value, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-hub-signature", signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn page_batch(senders: &[&str]) -> Value {
        let messaging: Vec<_> = senders
            .iter()
            .map(|id| {
                json!({"sender": {"id": id}, "recipient": {"id": "page"}, "message": {"text": "N"}})
            })
            .collect();
        json!({"object": "page", "entry": [{"id": "page", "time": 1, "messaging": messaging}]})
    }

    async fn read_text(response: axum::response::Response) -> String {
        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(None, Arc::default())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_text(response).await, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_verification_echoes_challenge_for_matching_token() {
        let response = app(None, Arc::default())
            .oneshot(
                Request::builder()
                    .uri("/webhook?hub.mode=subscribe&hub.verify_token=T1&hub.challenge=C")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_text(response).await, "C");
    }

    #[tokio::test]
    async fn test_verification_rejects_wrong_token() {
        let response = app(None, Arc::default())
            .oneshot(
                Request::builder()
                    .uri("/webhook?hub.mode=subscribe&hub.verify_token=T2&hub.challenge=C")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_signed_batch_is_answered_per_event() {
        let sender = Arc::new(MockSender::default());
        let body = page_batch(&["u1", "u2"]);
        let signature = sign("secret", body.to_string().as_bytes());

        let response = app(Some("secret"), sender.clone())
            .oneshot(post_webhook(&body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_str(&read_text(response).await).unwrap();
        assert_eq!(json["summary"]["forwarded"], 2);

        let mut calls = sender.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("u1".to_string(), "echo N".to_string()),
                ("u2".to_string(), "echo N".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_or_missing_signature_is_unauthorized() {
        let sender = Arc::new(MockSender::default());
        let body = page_batch(&["u1"]);
        let router = app(Some("secret"), sender.clone());

        let response = router
            .clone()
            .oneshot(post_webhook(&body, Some(sign("other", body.to_string().as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router.oneshot(post_webhook(&body, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert!(sender.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_page_object_is_forbidden_without_replies() {
        let sender = Arc::new(MockSender::default());
        let mut body = page_batch(&["u1"]);
        body["object"] = json!("instagram");
        let signature = sign("secret", body.to_string().as_bytes());

        let response = app(Some("secret"), sender.clone())
            .oneshot(post_webhook(&body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(sender.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_reply_failures_still_answer_200() {
        let sender = Arc::new(MockSender {
            fail_for: ["u2", "u3"].iter().map(|s| s.to_string()).collect(),
            calls: Mutex::default(),
        });
        let body = page_batch(&["u1", "u2", "u3", "u4", "u5"]);
        let signature = sign("secret", body.to_string().as_bytes());

        let response = app(Some("secret"), sender.clone())
            .oneshot(post_webhook(&body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_str(&read_text(response).await).unwrap();
        assert_eq!(json["summary"]["failed"], 2);
        assert_eq!(json["summary"]["delivered"], 3);
        assert_eq!(sender.calls.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_unparsable_body_is_bad_request() {
        let response = app(Some("secret"), Arc::default())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header("x-hub-signature", sign("secret", b"not json"))
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_post_without_app_secret_is_unauthorized() {
        let sender = Arc::new(MockSender::default());
        let body = page_batch(&["u1", "u2"]);

        let response = app(None, sender.clone())
            .oneshot(post_webhook(&body, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(Some("   "), sender.clone())
            .oneshot(post_webhook(&body, Some(sign("   ", body.to_string().as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert!(sender.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_request_fields_carry_user_agent_and_signature_presence() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("user-agent", "facebookexternalua".parse().unwrap());
        headers.insert("x-hub-signature-256", "sha256=00".parse().unwrap());
        let snapshot = RequestSnapshot {
            method: axum::http::Method::POST,
            url: "/webhook".to_string(),
            headers,
            ip: None,
            session_id: None,
        };
        let response = Response::new(Body::empty());

        let fields = request_fields(&snapshot, &response);
        assert_eq!(fields.get("userAgent"), Some(&json!("facebookexternalua")));
        assert_eq!(fields.get("signed"), Some(&json!(true)));

        let snapshot = RequestSnapshot {
            url: "/health".to_string(),
            headers: axum::http::HeaderMap::new(),
            ..snapshot
        };
        assert!(request_fields(&snapshot, &response).is_empty());
    }
}
