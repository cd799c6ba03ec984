//! Per-request response timing.

use std::time::Instant;

/// Start and end marks for one request.
///
/// The end mark is taken when the response headers are produced, not when
/// the body has finished streaming.
#[derive(Debug, Default, Clone, Copy)]
pub struct Timing {
    start: Option<Instant>,
    end: Option<Instant>,
}

impl Timing {
    /// A tracker with the start mark already set.
    pub fn started() -> Self {
        Self {
            start: Some(Instant::now()),
            end: None,
        }
    }

    pub fn mark_end(&mut self) {
        self.end = Some(Instant::now());
    }

    /// Elapsed milliseconds, or `None` when either mark is missing.
    pub fn response_time_ms(&self) -> Option<u64> {
        elapsed_ms(self.start?, self.end?)
    }
}

/// Milliseconds from `start` to `end`, rounded to the nearest millisecond.
///
/// Returns `None` if `end` precedes `start`.
pub fn elapsed_ms(start: Instant, end: Instant) -> Option<u64> {
    let nanos = end.checked_duration_since(start)?.as_nanos();
    u64::try_from((nanos + 500_000) / 1_000_000).ok()
}
