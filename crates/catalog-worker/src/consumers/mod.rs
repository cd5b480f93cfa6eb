//! Broker consumers.

pub mod media_converted;
