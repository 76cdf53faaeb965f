//! Flowline domain core.
//!
//! Pure domain types and storage contracts for the flow run lifecycle:
//! run statuses and their state machine, worker progress reports, the job
//! queue contract, quota gating and piece version locking. Nothing in this
//! crate talks to the network or a database; the in-memory backends in
//! [`memory`] implement every contract for single-process deployments.

pub mod edition;
pub mod error;
pub mod flow;
pub mod job_data;
pub mod memory;
pub mod piece_lock;
pub mod queue;
pub mod quota;
pub mod run;
pub mod run_events;
pub mod store;
pub mod triggers;
pub mod types;
pub mod webhook_response;
