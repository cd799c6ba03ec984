//! Bridge from `tracing` events into the transport fan-out.
//!
//! Events are converted on the emitting thread and queued; a single task
//! delivers them in order, so the console keeps event order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use super::logger::TRANSPORT_TARGET;
use super::{ErrorReport, Level, LogRecord, Logger, Origin};

/// Field that names the class of the `error` field on the same event.
pub const ERROR_CLASS_FIELD: &str = "error_class";

/// Counters shared by the layer and its delivery task.
#[derive(Debug, Default)]
pub struct BridgeStats {
    /// Total events seen by the layer.
    pub total: AtomicU64,
    /// Successfully enqueued into channel.
    pub enqueued: AtomicU64,
    /// Dropped because the channel was full or closed.
    pub dropped: AtomicU64,
    /// Handed to the logger and fully delivered.
    pub delivered: AtomicU64,
}

impl BridgeStats {
    fn pending(&self) -> u64 {
        self.enqueued
            .load(Ordering::Relaxed)
            .saturating_sub(self.delivered.load(Ordering::Relaxed))
    }
}

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// hands them to a [`Logger`] through a bounded channel.
///
/// When the channel is full the record is dropped and counted.
pub struct TransportLayer {
    sender: mpsc::Sender<LogRecord>,
    stats: Arc<BridgeStats>,
}

/// Owner's view of a running bridge.
pub struct BridgeHandle {
    stats: Arc<BridgeStats>,
    task: JoinHandle<()>,
}

impl TransportLayer {
    /// Create the layer and spawn the delivery task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(logger: Arc<Logger>, buffer: usize) -> (Self, BridgeHandle) {
        let (tx, mut rx) = mpsc::channel::<LogRecord>(buffer.max(16));
        let stats = Arc::new(BridgeStats::default());

        let task_stats = Arc::clone(&stats);
        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                logger.dispatch(record).await;
                task_stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
        });

        (
            Self {
                sender: tx,
                stats: Arc::clone(&stats),
            },
            BridgeHandle { stats, task },
        )
    }
}

impl BridgeHandle {
    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Wait until every enqueued record has been delivered, or `timeout`
    /// elapses. Returns whether the queue drained.
    ///
    /// The global subscriber keeps the channel open, so this polls the
    /// counters instead of waiting for the task to end.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.stats.pending() > 0 {
            if self.task.is_finished() || tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

impl<S> Layer<S> for TransportLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.stats.total.fetch_add(1, Ordering::Relaxed);

        let record = record_from_event(event);

        if self.sender.try_send(record).is_ok() {
            self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Convert a tracing event into a log record.
pub fn record_from_event(event: &Event<'_>) -> LogRecord {
    let mut fields = BTreeMap::new();
    let mut message: Option<String> = None;
    let mut error: Option<ErrorReport> = None;

    let mut visitor = FieldVisitor {
        fields: &mut fields,
        message: &mut message,
        error: &mut error,
    };
    event.record(&mut visitor);

    if let Some(report) = error.as_mut() {
        if let Some(Value::String(class)) = fields.get(ERROR_CLASS_FIELD) {
            report.class = class.clone();
        }
    }

    let meta = event.metadata();
    let origin = if meta.target() == TRANSPORT_TARGET {
        Origin::Transport
    } else {
        Origin::Application
    };

    LogRecord {
        level: Level::from(*meta.level()),
        message,
        http: None,
        fields,
        error,
        origin,
        target: Some(meta.target().to_string()),
    }
}

struct FieldVisitor<'a> {
    fields: &'a mut BTreeMap<String, Value>,
    message: &'a mut Option<String>,
    error: &'a mut Option<ErrorReport>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        *self.error = Some(ErrorReport::from_error("Error", value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), Value::String(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::transport::{Transport, TransportError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Default)]
    struct Collect {
        records: Mutex<Vec<LogRecord>>,
    }

    #[async_trait]
    impl Transport for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn min_level(&self) -> Level {
            Level::Silly
        }

        fn accepts(&self, _record: &LogRecord) -> bool {
            true
        }

        async fn deliver(&self, record: &LogRecord) -> Result<(), TransportError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("send api rejected message")]
    struct Rejected;

    #[tokio::test]
    async fn test_events_become_records() {
        let sink = Arc::new(Collect::default());
        let logger = Arc::new(Logger::new().with_transport(sink.clone()));
        let (layer, handle) = TransportLayer::new(logger, 64);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(recipient = "42", attempt = 1u64, "messenger_reply_failed");
            let err = Rejected;
            tracing::error!(
                error = &err as &(dyn std::error::Error + 'static),
                error_class = "Rejected",
                "send_failed"
            );
            tracing::warn!(target: TRANSPORT_TARGET, transport = "rollbar", "log_transport_failed");
        });

        assert!(handle.drain(Duration::from_secs(1)).await);
        assert_eq!(handle.stats().total.load(Ordering::Relaxed), 3);
        assert_eq!(handle.stats().enqueued.load(Ordering::Relaxed), 3);
        assert_eq!(handle.stats().dropped.load(Ordering::Relaxed), 0);

        let records = sink.records.lock().unwrap();
        assert_eq!(records[0].level, Level::Warn);
        assert_eq!(records[0].message.as_deref(), Some("messenger_reply_failed"));
        assert_eq!(records[0].fields.get("recipient"), Some(&Value::from("42")));
        assert_eq!(records[0].fields.get("attempt"), Some(&Value::from(1u64)));
        assert_eq!(records[0].origin, Origin::Application);

        let report = records[1].error.as_ref().unwrap();
        assert_eq!(report.message, "send api rejected message");
        assert_eq!(report.class, "Rejected");
        assert_eq!(records[1].level, Level::Error);

        assert_eq!(records[2].origin, Origin::Transport);
    }

    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        fn min_level(&self) -> Level {
            Level::Silly
        }

        async fn deliver(&self, _record: &LogRecord) -> Result<(), TransportError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_timeout() {
        let logger = Arc::new(Logger::new().with_transport(Arc::new(Stalled)));
        let (layer, handle) = TransportLayer::new(logger, 16);

        tracing::subscriber::with_default(tracing_subscriber::registry().with(layer), || {
            tracing::info!("stuck");
        });

        assert!(!handle.drain(Duration::from_millis(50)).await);
        assert_eq!(handle.stats().delivered.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_overflow_is_counted_as_dropped() {
        let logger = Arc::new(Logger::new().with_transport(Arc::new(Stalled)));
        let (layer, handle) = TransportLayer::new(logger, 16);

        tracing::subscriber::with_default(tracing_subscriber::registry().with(layer), || {
            for i in 0..40u64 {
                tracing::info!(i, "burst");
            }
        });

        let stats = handle.stats();
        assert_eq!(stats.total.load(Ordering::Relaxed), 40);
        assert_eq!(stats.enqueued.load(Ordering::Relaxed), 16);
        assert_eq!(stats.dropped.load(Ordering::Relaxed), 24);
    }
}
