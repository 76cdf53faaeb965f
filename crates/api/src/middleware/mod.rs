//! Authentication and authorization extractors.
//!
//! - [`auth::Principal`] -- Extracts the caller from a JWT Bearer token.
//! - [`rbac::RequireEngine`] -- Requires an ENGINE principal bound to a job claim.
//! - [`rbac::RequireWorker`] -- Requires a WORKER principal.

pub mod auth;
pub mod rbac;
