//! Shared test doubles and utilities for the video catalog.

mod clock;
mod handlers;

pub use clock::{FixedClock, fixed_now};
pub use handlers::{FailingEventHandler, RecordingEventHandler};
