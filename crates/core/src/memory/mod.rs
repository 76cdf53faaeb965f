//! Single-process backends for every storage contract.
//!
//! Used when no database is configured and by the test suites. All state lives
//! behind `tokio` locks and is lost on restart.

mod files;
mod flows;
mod queue;
mod runs;
mod usage;

pub use files::{InMemoryFileStore, InMemoryPieceRegistry};
pub use flows::InMemoryFlowStore;
pub use queue::InMemoryJobQueue;
pub use runs::InMemoryRunStore;
pub use usage::InMemoryUsageStore;
