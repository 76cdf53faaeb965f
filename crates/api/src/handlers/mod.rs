//! Request handlers.
//!
//! Handlers extract the caller's principal, delegate to the
//! [`RunCoordinator`](crate::engine::RunCoordinator) or the job queue and map
//! errors via [`AppError`](crate::error::AppError).

pub mod engine;
pub mod webhooks;
pub mod workers;
