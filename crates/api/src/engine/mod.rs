//! Run lifecycle engine.
//!
//! Contains the [`RunCoordinator`] that reconciles worker reports into run
//! records, the background sweeper that redelivers jobs whose claim expired,
//! and the relay that forwards run progress to WebSocket clients.

pub mod coordinator;
pub mod relay;
pub mod sweeper;

pub use coordinator::{
    CoordinatorSettings, JobClaim, ProgressReport, ReplyTarget, RunCoordinator, StartRun,
};
pub use relay::ProgressRelay;
pub use sweeper::ClaimSweeper;
