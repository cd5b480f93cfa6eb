//! Catalog Core — shared domain abstractions.
//!
//! This crate defines the aggregate, event and transaction primitives every
//! bounded context of the video catalog builds on: the unit of work, the
//! domain event manager and the application service that ties them together
//! so events are only dispatched after a commit.

pub mod aggregate;
pub mod application_service;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod event_manager;
pub mod in_memory;
pub mod notification;
pub mod unit_of_work;

#[cfg(test)]
mod testing;
