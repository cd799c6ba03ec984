//! The local message pipeline.
//!
//! Inbound Messenger messages are replayed here as `POST /` with a
//! [`SyntheticMessage`] body; whatever text this route answers becomes the
//! reply. The stock handler acknowledges the message; deployments swap in
//! their own router.

use axum::{response::IntoResponse, routing::post, Extension, Json, Router};

use crate::logging::{log_requests, LogFields, RequestLogging};
use crate::messenger::SyntheticMessage;

/// Router for the pipeline, request-logged like every other route.
pub fn pipeline_router(logging: RequestLogging) -> Router {
    Router::new()
        .route("/", post(acknowledge))
        .layer(axum::middleware::from_fn_with_state(logging, log_requests))
}

pub async fn acknowledge(Json(message): Json<SyntheticMessage>) -> impl IntoResponse {
    let fields = LogFields::new()
        .with("input", message.body.clone())
        .with("isFB", message.is_fb);

    let reply = if message.body.trim().is_empty() {
        "Sorry, I can only read text messages.".to_string()
    } else {
        format!("Received: {}", message.body.trim())
    };

    (Extension(fields), reply)
}
