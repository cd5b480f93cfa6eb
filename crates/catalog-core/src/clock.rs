//! Time source injected into aggregates and queues.

use chrono::{DateTime, Utc};

/// Abstraction over system time so aggregates stamp events deterministically
/// under test.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
