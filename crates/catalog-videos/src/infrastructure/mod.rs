//! In-process adapters for the Video context's ports.

pub mod in_memory;
