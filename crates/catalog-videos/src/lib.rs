//! Catalog Videos — the Video bounded context.
//!
//! Owns the `Video` aggregate and its media slots, the rule that decides
//! when a video becomes published, and the use cases that upload media and
//! record the encoder's results.

pub mod application;
pub mod domain;
pub mod infrastructure;
