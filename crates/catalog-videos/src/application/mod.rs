//! Application layer of the Video context.

pub mod command_handlers;
pub mod event_handlers;
