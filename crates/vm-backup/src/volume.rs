//! Resolution of declared file paths to their owning storage volumes.
//!

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::{
    cluster::ClusterVolumes,
    provider::{FileSpec, ProviderError},
};

/// The mapping from a volume's mount path to the volume name the snapshot
/// provider expects.
///
/// On standard volumes the two coincide; on cluster-shared volumes the live
/// path and the snapshot-registration name diverge. The map is built once per
/// partition and is read-only afterwards. Mount-path keys are stored
/// upper-cased so lookups compare case-insensitively.
#[derive(Debug, Default)]
pub struct VolumeMap {
    volumes: BTreeMap<String, String>,
}

impl VolumeMap {
    /// Determine the owning volume for every declared file spec.
    ///
    /// Paths on a cluster-shared volume are delegated to the cluster helper;
    /// any other path contributes its drive or filesystem root as both mount
    /// path and volume name.
    pub fn resolve(
        files: &[FileSpec],
        cluster: &dyn ClusterVolumes,
    ) -> Result<Self, VolumeError> {
        let mut map = Self::default();

        for file in files {
            let (mount_path, volume_name) =
                if cluster.is_supported() && cluster.is_on_shared_volume(&file.path)? {
                    cluster.prepare_for_backup(&file.path)?
                } else {
                    let root = path_root(&file.path)
                        .ok_or_else(|| VolumeError::VolumeNotFound(file.path.clone()))?;
                    (root.clone(), root)
                };

            map.insert(mount_path, volume_name)?;
        }

        Ok(map)
    }

    /// Insert-if-absent. The same mount path registering two different volume
    /// names is rejected rather than silently picking one.
    fn insert(&mut self, mount_path: String, volume_name: String) -> Result<(), VolumeError> {
        let key = mount_path.to_uppercase();

        match self.volumes.get(&key) {
            None => {
                self.volumes.insert(key, volume_name);
                Ok(())
            }
            Some(existing) if existing.eq_ignore_ascii_case(&volume_name) => Ok(()),
            Some(existing) => Err(VolumeError::VolumeNameConflict {
                mount_path: key,
                first: existing.clone(),
                second: volume_name,
            }),
        }
    }

    /// The mount path and volume name owning `path`.
    ///
    /// Mount paths can be nested, so the owning mount is the longest
    /// case-insensitive prefix of `path` among all known mount paths.
    pub fn owning_mount(&self, path: &str) -> Result<(&str, &str), VolumeError> {
        let upper = path.to_uppercase();

        self.volumes
            .iter()
            .filter(|(mount, _)| upper.starts_with(mount.as_str()))
            .max_by_key(|(mount, _)| mount.len())
            .map(|(mount, volume)| (mount.as_str(), volume.as_str()))
            .ok_or_else(|| VolumeError::AmbiguousPath(path.to_string()))
    }

    /// The distinct volume names to add to the snapshot set, in stable order.
    pub fn volume_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.volumes.values().collect();
        names.into_iter().cloned().collect()
    }

    /// The known mount paths, upper-cased, in stable order.
    pub fn mount_paths(&self) -> impl Iterator<Item = &str> {
        self.volumes.keys().map(String::as_str)
    }

    /// Whether no volume was resolved.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

/// The drive (`X:\`) or filesystem (`/`) root of a path, upper-cased.
fn path_root(path: &str) -> Option<String> {
    if path.starts_with('/') {
        return Some("/".to_string());
    }

    let bytes = path.as_bytes();
    if bytes.len() >= 3
        && bytes.first()?.is_ascii_alphabetic()
        && bytes.get(1) == Some(&b':')
        && matches!(bytes.get(2), Some(b'\\') | Some(b'/'))
    {
        return Some(path.get(..3)?.to_uppercase());
    }

    None
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Could not determine the volume root for '{0}'")]
    VolumeNotFound(String),

    #[error("No known mount path covers '{0}'")]
    AmbiguousPath(String),

    #[error("Mount path '{mount_path}' maps to both '{first}' and '{second}'")]
    VolumeNameConflict {
        mount_path: String,
        first: String,
        second: String,
    },

    #[error("Cluster volume helper failed:\n{0}")]
    Cluster(#[from] ProviderError),
}
