//! Webhook endpoint handlers.
//!
//! `GET /webhook` answers the subscription handshake. `POST /webhook`
//! verifies the signature, then hands the batch to the [`Dispatcher`] and
//! waits for every reply to settle before answering.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::messenger::{DispatchOutcome, DispatchSummary, Dispatcher, WebhookBody};
use crate::web::signature::{
    configured_secret, verify_request_signature, SIGNATURE_256_HEADER, SIGNATURE_HEADER,
};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: Config, dispatcher: Dispatcher) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Subscription handshake
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Echo `hub.challenge` when the mode is `subscribe` and the token matches.
pub async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let expected = state.config.fb_validation_token.as_deref();

    match (params.mode.as_deref(), params.verify_token.as_deref(), expected) {
        (Some("subscribe"), Some(provided), Some(expected)) if provided == expected => {
            info!("messenger_webhook_validated");
            (StatusCode::OK, params.challenge.unwrap_or_default()).into_response()
        }
        _ => {
            warn!(
                mode = ?params.mode,
                token_configured = expected.is_some(),
                "messenger_webhook_validation_failed"
            );
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

// =============================================================================
// Messenger callback
// =============================================================================

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<DispatchSummary>,
}

impl WebhookResponse {
    fn reply(status: StatusCode, label: &'static str) -> Response {
        (
            status,
            Json(WebhookResponse {
                status: label,
                summary: None,
            }),
        )
            .into_response()
    }
}

/// Messenger callback endpoint.
///
/// This endpoint:
/// 1. Verifies the HMAC signature over the raw body (401 when no app secret is set)
/// 2. Parses the batch
/// 3. Dispatches every messaging event and waits for all replies
/// 4. Returns 200 regardless of individual reply failures
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = headers
        .get(SIGNATURE_256_HEADER)
        .or_else(|| headers.get(SIGNATURE_HEADER))
        .and_then(|v| v.to_str().ok());

    let verified = configured_secret(&state.config.fb_app_secret)
        .and_then(|secret| verify_request_signature(&body, header, secret));
    if let Err(e) = verified {
        warn!(error = %e, body_length = body.len(), "messenger_signature_invalid");
        return WebhookResponse::reply(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let payload: WebhookBody = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, body_length = body.len(), "messenger_webhook_unparsable");
            return WebhookResponse::reply(StatusCode::BAD_REQUEST, "invalid_body");
        }
    };

    info!(
        object = %payload.object,
        entries = payload.entry.len(),
        "messenger_webhook_received"
    );

    match state.dispatcher.dispatch(&payload).await {
        DispatchOutcome::NotPage => WebhookResponse::reply(StatusCode::FORBIDDEN, "forbidden"),
        DispatchOutcome::Dispatched(summary) => (
            StatusCode::OK,
            Json(WebhookResponse {
                status: "ok",
                summary: Some(summary),
            }),
        )
            .into_response(),
    }
}
