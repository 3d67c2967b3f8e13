//! Time sources for transaction ordering.
//!
//! Every timestamp in the protocol (start time, commit time, validity and
//! lease deadlines) is a `u64` tick count in microseconds handed out by a
//! [`TimeSource`]. The source is a capability so that deployments can swap a
//! local clock for a remote oracle, and tests can drive lease expiry by hand.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors raised by a time source
#[derive(Debug, Error)]
pub enum TimeSourceError {
    #[error("System clock is before the Unix epoch")]
    ClockBeforeEpoch,

    #[error("Time source unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, TimeSourceError>;

/// Capability that hands out timestamps in microsecond ticks.
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Return the current time. Implementations never go backwards.
    async fn now(&self) -> Result<u64>;
}

/// Shared handle to any time source.
pub type SharedTimeSource = Arc<dyn TimeSource>;

/// Convert a duration to the tick unit used by every time source.
pub fn ticks(duration: Duration) -> u64 {
    duration.as_micros() as u64
}

fn wall_clock_micros() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .map_err(|_| TimeSourceError::ClockBeforeEpoch)
}

/// Wall-clock time source that is strictly increasing across calls.
///
/// Two calls within the same microsecond get distinct, increasing values by
/// bumping past the last value handed out.
pub struct MonotonicTimeSource {
    last: AtomicU64,
}

impl MonotonicTimeSource {
    /// Create a new monotonic time source.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    fn advance(&self, physical: u64) -> u64 {
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let next = physical.max(last + 1);
            match self
                .last
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}

impl Default for MonotonicTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimeSource for MonotonicTimeSource {
    async fn now(&self) -> Result<u64> {
        let physical = wall_clock_micros()?;
        Ok(self.advance(physical))
    }
}

/// Purely logical time source: every call returns the next integer.
pub struct CounterTimeSource {
    next: AtomicU64,
}

impl CounterTimeSource {
    /// Create a counter that starts at `start`.
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

#[async_trait]
impl TimeSource for CounterTimeSource {
    async fn now(&self) -> Result<u64> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Manually driven time source for tests.
///
/// Returns the same value until [`ManualTimeSource::advance`] or
/// [`ManualTimeSource::set`] is called.
pub struct ManualTimeSource {
    current: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(start: u64) -> Self {
        Self {
            current: AtomicU64::new(start),
        }
    }

    /// Move the clock forward by `delta` ticks, returning the new time.
    pub fn advance(&self, delta: u64) -> u64 {
        self.current.fetch_add(delta, Ordering::SeqCst) + delta
    }

    /// Set the clock, ignoring values that would move it backwards.
    pub fn set(&self, value: u64) {
        self.current.fetch_max(value, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeSource for ManualTimeSource {
    async fn now(&self) -> Result<u64> {
        Ok(self.current())
    }
}
