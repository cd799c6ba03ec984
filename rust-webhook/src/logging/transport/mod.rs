//! Pluggable destinations for [`LogRecord`]s.

pub mod analytics;
pub mod console;
pub mod rollbar;

use async_trait::async_trait;

use super::{Level, LogRecord, Origin};

pub use analytics::{AnalyticsFields, AnalyticsTransport, NamedTiming};
pub use console::ConsoleTransport;
pub use rollbar::RollbarTransport;

/// A sink registered with the [`Logger`](super::Logger).
///
/// The logger calls `deliver` from a background task; a failing transport
/// never affects the others or the request that produced the record.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Least severe level this transport is interested in.
    fn min_level(&self) -> Level;

    /// Whether `record` should be handed to [`deliver`](Transport::deliver).
    ///
    /// Reports about failed deliveries are only accepted by transports that
    /// override this.
    fn accepts(&self, record: &LogRecord) -> bool {
        record.origin != Origin::Transport && record.level.passes(self.min_level())
    }

    /// Push one record to the backend.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was written or deliberately ignored.
    /// - `Err(..)` if the backend failed or the transport lacks the
    ///   configuration it needs for this record.
    async fn deliver(&self, record: &LogRecord) -> Result<(), TransportError>;
}

/// Failure of a single delivery.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {0}")]
    Status(u16),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}
