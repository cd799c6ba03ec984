//! Messenger webhook and Send API payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only `object` value the webhook accepts.
pub const PAGE_OBJECT: &str = "page";

/// Metadata attached to every outbound reply.
pub const REPLY_METADATA: &str = "DEVELOPER_DEFINED_METADATA";

// =============================================================================
// Inbound webhook
// =============================================================================

/// Batched callback body.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookBody {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<PageEntry>,
}

impl WebhookBody {
    pub fn is_page(&self) -> bool {
        self.object == PAGE_OBJECT
    }
}

/// One page's share of a batch.
#[derive(Debug, Clone, Deserialize)]
pub struct PageEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagingEvent {
    pub sender: Participant,
    #[serde(default)]
    pub message: Option<Message>,
    /// Everything else (postbacks, deliveries, reads), kept for logging.
    #[serde(flatten)]
    pub other: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    #[serde(default)]
    pub text: Option<String>,
}

// =============================================================================
// Local pipeline
// =============================================================================

/// Body of the synthetic request replayed into the local pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyntheticMessage {
    #[serde(rename = "Body")]
    pub body: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "isFB")]
    pub is_fb: bool,
}

// =============================================================================
// Send API
// =============================================================================

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutboundMessage {
    pub recipient: Participant,
    pub message: OutboundText,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutboundText {
    pub text: String,
    pub metadata: String,
}

impl OutboundMessage {
    pub fn reply(recipient_id: &str, text: &str) -> Self {
        Self {
            recipient: Participant {
                id: recipient_id.to_string(),
            },
            message: OutboundText {
                text: text.to_string(),
                metadata: REPLY_METADATA.to_string(),
            },
        }
    }
}
