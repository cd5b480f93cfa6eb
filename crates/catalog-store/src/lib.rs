//! Catalog Store — `PostgreSQL` adapters.
//!
//! [`pg_unit_of_work::PgUnitOfWork`] owns the sqlx transaction of one
//! logical operation; repositories borrow its connection so every write of
//! the operation commits or rolls back together.

pub mod pg_unit_of_work;
pub mod pg_video_repository;
pub mod schema;

use catalog_core::error::DomainError;

/// Maps a sqlx failure to the domain's infrastructure error.
pub(crate) fn db_error(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(err.to_string())
}
