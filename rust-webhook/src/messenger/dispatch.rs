//! Fan-out of a batched webhook into per-event replies.
//!
//! Every messaging event that carries a message is replayed into the local
//! pipeline as a synthetic `POST /`; the pipeline's response body is posted
//! back to the sender. Replies run concurrently and the batch settles only
//! when all of them have finished, successfully or not.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    Router,
};
use futures::future::join_all;
use serde::Serialize;
use tower::ServiceExt;
use tracing::{error, info, warn};

use super::send::{ReplySender, SendError};
use super::types::{MessagingEvent, SyntheticMessage, WebhookBody};
use crate::logging::SessionId;

/// Upper bound on a pipeline reply body.
const MAX_REPLY_BYTES: usize = 64 * 1024;

/// A messaging event without a message payload.
#[derive(Debug, thiserror::Error)]
#[error("messaging event from {sender} has no message")]
pub struct MalformedEventError {
    pub sender: String,
}

/// Failure to answer one messaging event.
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("failed to encode pipeline request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to build pipeline request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("failed to read pipeline response: {0}")]
    Body(#[source] axum::Error),

    #[error(transparent)]
    Send(#[from] SendError),
}

impl ReplyError {
    /// Class name reported to the error-reporting sink.
    pub fn class(&self) -> &'static str {
        match self {
            ReplyError::Encode(_) => "PipelineEncodeError",
            ReplyError::Request(_) => "PipelineRequestError",
            ReplyError::Body(_) => "PipelineBodyError",
            ReplyError::Send(SendError::Transport(_)) => "SendTransportError",
            ReplyError::Send(SendError::Status { .. }) => "SendStatusError",
        }
    }
}

/// Counts for one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Events replayed into the pipeline.
    pub forwarded: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Events dropped for lacking a message.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// `object` was not `"page"`; nothing was processed.
    NotPage,
    Dispatched(DispatchSummary),
}

pub struct Dispatcher {
    pipeline: Router,
    sender: Arc<dyn ReplySender>,
}

impl Dispatcher {
    pub fn new(pipeline: Router, sender: Arc<dyn ReplySender>) -> Self {
        Self { pipeline, sender }
    }

    pub async fn dispatch(&self, body: &WebhookBody) -> DispatchOutcome {
        if !body.is_page() {
            warn!(object = %body.object, "messenger_webhook_not_page");
            return DispatchOutcome::NotPage;
        }

        let mut replies = Vec::new();
        let mut skipped = 0;

        for entry in &body.entry {
            for event in &entry.messaging {
                match &event.message {
                    Some(message) => {
                        let text = message.text.as_deref().unwrap_or_default();
                        replies.push(self.answer(&event.sender.id, text));
                    }
                    None => {
                        skipped += 1;
                        let err = MalformedEventError {
                            sender: event.sender.id.clone(),
                        };
                        warn!(
                            page_id = entry.id.as_deref().unwrap_or("unknown"),
                            error = %err,
                            event = %describe(event),
                            "messenger_event_unknown"
                        );
                    }
                }
            }
        }

        let forwarded = replies.len();
        let results = join_all(replies).await;
        let failed = results.iter().filter(|r| r.is_err()).count();

        let summary = DispatchSummary {
            forwarded,
            delivered: forwarded - failed,
            failed,
            skipped,
        };

        info!(
            entries = body.entry.len(),
            forwarded = summary.forwarded,
            delivered = summary.delivered,
            failed = summary.failed,
            skipped = summary.skipped,
            "messenger_batch_complete"
        );

        DispatchOutcome::Dispatched(summary)
    }

    async fn answer(&self, sender_id: &str, text: &str) -> Result<(), ReplyError> {
        let result = async {
            let reply = self.run_pipeline(sender_id, text).await?;
            self.sender.send(sender_id, &reply).await?;
            Ok::<(), ReplyError>(())
        }
        .await;

        if let Err(err) = &result {
            error!(
                recipient = sender_id,
                error = err as &(dyn std::error::Error + 'static),
                error_class = err.class(),
                "messenger_reply_failed"
            );
        }
        result
    }

    /// Replay one message through the local pipeline and return its reply.
    async fn run_pipeline(&self, sender_id: &str, text: &str) -> Result<String, ReplyError> {
        let synthetic = SyntheticMessage {
            body: text.to_string(),
            from: sender_id.to_string(),
            is_fb: true,
        };
        let payload = serde_json::to_vec(&synthetic)?;

        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload))?;
        request
            .extensions_mut()
            .insert(SessionId(sender_id.to_string()));

        let response = self
            .pipeline
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|never: Infallible| match never {});

        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), MAX_REPLY_BYTES)
            .await
            .map_err(ReplyError::Body)?;

        if !status.is_success() {
            warn!(
                recipient = sender_id,
                status_code = status.as_u16(),
                "messenger_pipeline_non_success"
            );
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn describe(event: &MessagingEvent) -> String {
    let mut map = event.other.clone();
    map.insert(
        "sender".to_string(),
        serde_json::json!({ "id": event.sender.id }),
    );
    serde_json::Value::Object(map).to_string()
}
