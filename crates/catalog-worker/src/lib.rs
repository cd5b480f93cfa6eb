//! Catalog Worker — process wiring for the video catalog.
//!
//! Hosts the broker consumer for media-completion callbacks, the
//! integration event relay and a health endpoint.

pub mod config;
pub mod consumers;
pub mod error;
pub mod routes;
pub mod scope;
pub mod state;
pub mod telemetry;
