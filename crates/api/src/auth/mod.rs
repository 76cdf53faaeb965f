//! Authentication primitives.
//!
//! - [`jwt`] -- principal token generation and validation.

pub mod jwt;
