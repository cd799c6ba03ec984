//! Structured request logging with multi-transport fan-out.
//!
//! ```text
//! request → log_requests (Timing) → handler → LogRecord → Logger → { console, rollbar, analytics }
//! tracing event → TransportLayer → Logger
//! ```

pub mod init;
pub mod layer;
pub mod level;
pub mod logger;
pub mod middleware;
pub mod policy;
pub mod record;
pub mod timing;
pub mod transport;

pub use layer::{BridgeHandle, BridgeStats, TransportLayer};
pub use level::Level;
pub use logger::{FanoutReport, Logger, TRANSPORT_TARGET};
pub use middleware::{log_requests, LogFields, RequestLogging, RequestSnapshot, SessionId};
pub use policy::ExclusionPolicy;
pub use record::{merge_fields, ErrorReport, HttpFields, LogRecord, Origin};
pub use timing::{elapsed_ms, Timing};
