//! Row types for every table, with conversions into domain types.
//!
//! Statuses are stored as TEXT and parsed on the way out, so a row with an
//! unknown status surfaces as a `CoreError::Validation` rather than a panic.

pub mod flow;
pub mod flow_run;
pub mod job;
