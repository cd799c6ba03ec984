//! Fan-out of records to every registered transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::warn;

use super::transport::{Transport, TransportError};
use super::{LogRecord, Origin};

/// Target used for reports about failed deliveries. The tracing bridge
/// marks events with this target as [`Origin::Transport`].
pub const TRANSPORT_TARGET: &str = "pagehook::transport";

/// Explicit, immutable set of transports built once at startup.
#[derive(Clone, Default)]
pub struct Logger {
    transports: Vec<Arc<dyn Transport>>,
    in_flight: Arc<AtomicUsize>,
}

/// Outcome of delivering one record.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn transport_names(&self) -> Vec<&str> {
        self.transports.iter().map(|t| t.name()).collect()
    }

    /// Deliver `record` to every transport that accepts it and wait for all
    /// of them. One transport failing never prevents delivery to the others.
    pub async fn dispatch(&self, record: LogRecord) -> FanoutReport {
        let eligible: Vec<&Arc<dyn Transport>> =
            self.transports.iter().filter(|t| t.accepts(&record)).collect();

        let deliveries = eligible.iter().map(|transport| {
            let record = &record;
            async move { (transport.name().to_string(), transport.deliver(record).await) }
        });
        let results = join_all(deliveries).await;

        let mut report = FanoutReport::default();
        for (name, result) in results {
            match result {
                Ok(()) => report.delivered.push(name),
                Err(e) => {
                    // Failures while reporting a failure are not reported again.
                    if record.origin != Origin::Transport {
                        report_failure(&name, &e);
                    }
                    report.failed.push(name);
                }
            }
        }
        report
    }

    /// Fire-and-forget delivery on a background task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn emit(self: &Arc<Self>, record: LogRecord) -> JoinHandle<FanoutReport> {
        let logger = Arc::clone(self);
        let guard = InFlight::enter(&self.in_flight);
        tokio::spawn(async move {
            let report = logger.dispatch(record).await;
            drop(guard);
            report
        })
    }

    /// Number of emitted records still being delivered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait for emitted records to finish delivering, up to `timeout`.
    /// Returns whether nothing was left in flight.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

/// Decrements the in-flight count when the delivery task ends, even if a
/// transport panicked.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(count))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn report_failure(transport: &str, error: &TransportError) {
    match error {
        TransportError::Configuration(reason) => {
            warn!(
                target: TRANSPORT_TARGET,
                transport = transport,
                reason = %reason,
                "log_transport_skipped"
            );
        }
        other => {
            warn!(
                target: TRANSPORT_TARGET,
                transport = transport,
                error = %other,
                "log_transport_failed"
            );
        }
    }
}
