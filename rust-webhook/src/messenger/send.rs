//! Messenger Send API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};

use super::types::OutboundMessage;

/// Failure of a single Send API call.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed calling Send API: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed calling Send API: status {status}")]
    Status { status: u16, body: String },
}

/// Posts one reply to one recipient. A single attempt, no retry.
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<(), SendError>;
}

/// [`ReplySender`] backed by the Graph API.
#[derive(Clone)]
pub struct GraphSendClient {
    client: Client,
    url: String,
    access_token: String,
    timeout: Duration,
}

impl GraphSendClient {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            access_token: access_token.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReplySender for GraphSendClient {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<(), SendError> {
        let message = OutboundMessage::reply(recipient_id, text);

        let result = self
            .client
            .post(&self.url)
            .query(&[("access_token", self.access_token.as_str())])
            .json(&message)
            .timeout(self.timeout)
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                warn!(
                    recipient = recipient_id,
                    is_timeout = e.is_timeout(),
                    error = %e,
                    "messenger_send_request_error"
                );
                return Err(SendError::Transport(e));
            }
        };

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            warn!(
                recipient = recipient_id,
                status_code = status,
                body_preview = %body.chars().take(200).collect::<String>(),
                "messenger_send_rejected"
            );
            return Err(SendError::Status { status, body });
        }

        info!(recipient = recipient_id, text_length = text.len(), "messenger_reply_sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Seen = Arc<Mutex<Vec<(HashMap<String, String>, Value)>>>;

    async fn fake_graph(status: StatusCode) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let captured = Arc::clone(&seen);
        let app = Router::new().route(
            "/me/messages",
            post(move |Query(q): Query<HashMap<String, String>>, Json(body): Json<Value>| {
                let captured = Arc::clone(&captured);
                async move {
                    captured.lock().unwrap().push((q, body));
                    status
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/me/messages", addr), seen)
    }

    #[tokio::test]
    async fn test_send_posts_envelope_with_token() {
        let (url, seen) = fake_graph(StatusCode::OK).await;
        let sender = GraphSendClient::new(Client::new(), url, "page-token", Duration::from_secs(5));

        sender.send("u1", "Next N in 4 min").await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.get("access_token").map(String::as_str), Some("page-token"));
        assert_eq!(seen[0].1["recipient"]["id"], "u1");
        assert_eq!(seen[0].1["message"]["text"], "Next N in 4 min");
        assert_eq!(seen[0].1["message"]["metadata"], "DEVELOPER_DEFINED_METADATA");
    }

    #[tokio::test]
    async fn test_non_200_is_send_error() {
        let (url, _) = fake_graph(StatusCode::BAD_REQUEST).await;
        let sender = GraphSendClient::new(Client::new(), url, "page-token", Duration::from_secs(5));

        let err = sender.send("u1", "hi").await.unwrap_err();
        assert!(matches!(err, SendError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_send_error() {
        let sender = GraphSendClient::new(
            Client::new(),
            "http://127.0.0.1:1/me/messages",
            "page-token",
            Duration::from_secs(5),
        );
        let err = sender.send("u1", "hi").await.unwrap_err();
        assert!(matches!(err, SendError::Transport(_)));
    }
}
