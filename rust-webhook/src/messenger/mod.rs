//! Messenger platform: webhook payloads, the Send API client and the
//! dispatcher that answers each inbound message through the local pipeline.

pub mod dispatch;
pub mod send;
pub mod types;

pub use dispatch::{DispatchOutcome, DispatchSummary, Dispatcher, MalformedEventError, ReplyError};
pub use send::{GraphSendClient, ReplySender, SendError};
pub use types::{MessagingEvent, OutboundMessage, PageEntry, SyntheticMessage, WebhookBody};
