//! pagehook - Messenger webhook receiver with multi-sink request logging.
//!
//! ## Architecture
//!
//! ```text
//! Messenger → POST /webhook → signature → Dispatcher → POST / (pipeline) → Send API
//!                  └──────────── log_requests → Logger → { console, rollbar, analytics }
//! ```

pub mod config;
pub mod logging;
pub mod messenger;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use logging::{Level, LogRecord, Logger, RequestLogging};
pub use messenger::{Dispatcher, GraphSendClient};
pub use web::AppState;
