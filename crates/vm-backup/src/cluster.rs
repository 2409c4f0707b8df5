//! Cluster-shared-volume support.
//!

use crate::provider::ProviderError;

/// Host support for cluster-shared volumes.
///
/// Under clustering the path files live on and the name the snapshot provider
/// expects for the volume diverge; this helper supplies both.
pub trait ClusterVolumes {
    /// Whether the host supports cluster-shared volumes at all.
    fn is_supported(&self) -> bool;

    /// Whether `path` lives on a cluster-shared volume.
    fn is_on_shared_volume(&self, path: &str) -> Result<bool, ProviderError>;

    /// The stable mount path and the volume name to register with the
    /// snapshot provider for `path`.
    fn prepare_for_backup(&self, path: &str) -> Result<(String, String), ProviderError>;
}

/// A host without cluster-shared volumes.
#[derive(Debug, Default)]
pub struct NoClusterVolumes;

impl ClusterVolumes for NoClusterVolumes {
    fn is_supported(&self) -> bool {
        false
    }

    fn is_on_shared_volume(&self, _path: &str) -> Result<bool, ProviderError> {
        Ok(false)
    }

    fn prepare_for_backup(&self, path: &str) -> Result<(String, String), ProviderError> {
        Err(ProviderError::new(
            "prepare cluster volume",
            format!("host has no cluster-shared volumes, cannot prepare '{path}'"),
        ))
    }
}
