//! Domain layer of the Video context.

pub mod aggregates;
pub mod commands;
pub mod events;
pub mod ids;
pub mod media;
pub mod repository;
