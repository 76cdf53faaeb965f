//! Repository layer: one zero-sized struct per table family.

pub mod file_repo;
pub mod flow_repo;
pub mod flow_run_repo;
pub mod job_repo;
pub mod piece_repo;
pub mod usage_repo;

pub use file_repo::FileRepo;
pub use flow_repo::FlowRepo;
pub use flow_run_repo::FlowRunRepo;
pub use job_repo::JobRepo;
pub use piece_repo::PieceRepo;
pub use usage_repo::UsageRepo;
