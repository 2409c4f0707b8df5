//! The host's point-in-time snapshot facility.
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod config;
pub mod mock;

pub use config::ConfigProvider;

/// A file specification declared by a component.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileSpec {
    /// The directory or file path.
    pub path: String,

    /// Optional file pattern applied to file names within `path`.
    #[serde(default)]
    pub spec: Option<String>,

    /// Whether directories under `path` are walked recursively.
    #[serde(default)]
    pub recursive: bool,
}

/// A hypervisor-writer-declared backup unit for one workload.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Component {
    /// The component name.
    pub name: String,

    /// The writer's logical path for the component.
    #[serde(default)]
    pub logical_path: String,

    /// The writer's type tag for the component.
    #[serde(default)]
    pub component_type: String,

    /// The human-readable caption.
    #[serde(default)]
    pub caption: String,

    /// The declared file specifications, in writer order.
    #[serde(default)]
    pub files: Vec<FileSpec>,
}

/// Identifier of one snapshot-set transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotSetId(pub u64);

/// Identifier of one snapshot within a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotId(pub u64);

/// A failure surfaced by the snapshot provider or the workload catalog.
#[derive(Debug, Error)]
#[error("Snapshot provider failed to {operation}:\n{message}")]
pub struct ProviderError {
    /// The operation that failed.
    pub operation: &'static str,

    /// The provider's failure detail.
    pub message: String,
}

impl ProviderError {
    /// Create a provider error for a named operation.
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// The snapshot provider driving one backup session.
///
/// Asynchronous provider operations (metadata gathering, prepare, the
/// snapshot cut) are issued and awaited inside the call, so every method
/// blocks until the operation completes.
pub trait SnapshotProvider {
    /// Open a session: full, non-bootable backup semantics, hypervisor
    /// writer class enabled.
    fn initialize(&mut self) -> Result<(), ProviderError>;

    /// Request and await the writer's component and file metadata.
    fn gather_metadata(&mut self) -> Result<(), ProviderError>;

    /// The components the hypervisor writer declares.
    fn components(&self) -> Result<Vec<Component>, ProviderError>;

    /// Register a component with the session.
    fn select_component(&mut self, component: &Component) -> Result<(), ProviderError>;

    /// Open a new snapshot-set transaction.
    fn start_snapshot_set(&mut self) -> Result<SnapshotSetId, ProviderError>;

    /// Add a volume to the pending set. Snapshot creation is deferred until
    /// [`Self::create_snapshots`]; membership accumulates first.
    fn add_volume(&mut self, volume_name: &str) -> Result<SnapshotId, ProviderError>;

    /// Await the provider's prepare-for-backup step.
    fn prepare_for_backup(&mut self) -> Result<(), ProviderError>;

    /// The atomic point-in-time cut. Irreversible: after this returns the
    /// set must be deleted even when later steps fail.
    fn create_snapshots(&mut self) -> Result<(), ProviderError>;

    /// The frozen device path exposing a created snapshot's contents.
    fn device_path(&self, snapshot: SnapshotId) -> Result<String, ProviderError>;

    /// Record a component's backup as succeeded.
    fn mark_component_succeeded(&mut self, component: &Component) -> Result<(), ProviderError>;

    /// Signal backup-complete for the session.
    fn complete_backup(&mut self) -> Result<(), ProviderError>;

    /// Delete every snapshot in the set.
    fn delete_snapshot_set(&mut self, set: SnapshotSetId, force: bool)
    -> Result<(), ProviderError>;
}
