//! # vm-backup
//! Crash-consistent backup of hypervisor-hosted virtual machines.
//!
//! Coordinates the host's point-in-time snapshot facility with an archiving
//! stage: workloads are selected from the catalog, their components and
//! volumes registered with a snapshot set, and every declared file is
//! streamed out of the frozen snapshot into a compressed tar archive while
//! progress and cancellation flow back to the caller.
//!

pub mod archive;
pub mod catalog;
pub mod cluster;
pub mod config;
pub mod logger;
pub mod orchestrator;
pub mod progress;
pub mod provider;
pub mod session;
pub mod volume;

pub use orchestrator::{BackupError, BackupRequest, run};
pub use progress::{CancelFlag, ProgressEvent, ProgressPhase, Reporter};
