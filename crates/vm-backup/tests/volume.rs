//! Tests for volume resolution.
//!

use common::TestCluster;
use vm_backup::{
    cluster::{ClusterVolumes, NoClusterVolumes},
    provider::ProviderError,
    volume::{VolumeError, VolumeMap},
};

mod common;

use common::file_spec;

#[test]
fn longest_prefix_wins() {
    let cluster = TestCluster::new(&[("C:\\Mounts\\Data\\", "\\\\?\\Volume{d1}\\")]);
    let files = [
        file_spec("C:\\Hyper-V\\vm0.vhdx", None, false),
        file_spec("C:\\Mounts\\Data\\vm1.vhdx", None, false),
    ];

    let volumes = VolumeMap::resolve(&files, &cluster).unwrap();

    let (mount, volume) = volumes.owning_mount("C:\\Mounts\\Data\\vm1.vhdx").unwrap();
    assert_eq!(mount, "C:\\MOUNTS\\DATA\\");
    assert_eq!(volume, "\\\\?\\Volume{d1}\\");

    let (mount, volume) = volumes.owning_mount("C:\\Hyper-V\\vm0.vhdx").unwrap();
    assert_eq!(mount, "C:\\");
    assert_eq!(volume, "C:\\");
}

#[test]
fn matching_is_case_insensitive() {
    let cluster = TestCluster::new(&[("C:\\Mounts\\Data\\", "\\\\?\\Volume{d1}\\")]);
    let files = [file_spec("C:\\Mounts\\Data\\vm1.vhdx", None, false)];

    let volumes = VolumeMap::resolve(&files, &cluster).unwrap();

    let (_, volume) = volumes.owning_mount("c:\\mounts\\data\\vm1.vhdx").unwrap();
    assert_eq!(volume, "\\\\?\\Volume{d1}\\");
}

#[test]
fn unmatched_path_is_ambiguous() {
    let files = [file_spec("C:\\Hyper-V\\vm0.vhdx", None, false)];
    let volumes = VolumeMap::resolve(&files, &NoClusterVolumes).unwrap();

    assert!(matches!(
        volumes.owning_mount("D:\\other.vhdx"),
        Err(VolumeError::AmbiguousPath(_))
    ));
}

#[test]
fn rootless_path_has_no_volume() {
    let files = [file_spec("relative\\path.vhdx", None, false)];

    assert!(matches!(
        VolumeMap::resolve(&files, &NoClusterVolumes),
        Err(VolumeError::VolumeNotFound(_))
    ));
}

#[test]
fn unix_style_root_resolves() {
    let files = [file_spec("/var/lib/vms/vm0/disk.img", None, false)];
    let volumes = VolumeMap::resolve(&files, &NoClusterVolumes).unwrap();

    let (mount, volume) = volumes.owning_mount("/var/lib/vms/vm0/disk.img").unwrap();
    assert_eq!(mount, "/");
    assert_eq!(volume, "/");
}

#[test]
fn duplicate_mounts_resolve_once() {
    let files = [
        file_spec("C:\\Hyper-V\\vm0.vhdx", None, false),
        file_spec("C:\\Hyper-V\\vm0.xml", None, false),
    ];

    let volumes = VolumeMap::resolve(&files, &NoClusterVolumes).unwrap();
    assert_eq!(volumes.volume_names(), vec!["C:\\".to_string()]);
}

/// Same mount path claiming two different volume names.
struct ConflictingCluster;

impl ClusterVolumes for ConflictingCluster {
    fn is_supported(&self) -> bool {
        true
    }

    fn is_on_shared_volume(&self, _path: &str) -> Result<bool, ProviderError> {
        Ok(true)
    }

    fn prepare_for_backup(&self, path: &str) -> Result<(String, String), ProviderError> {
        if path.contains("vm0") {
            Ok(("X:\\".to_string(), "vol-a".to_string()))
        } else {
            Ok(("X:\\".to_string(), "vol-b".to_string()))
        }
    }
}

#[test]
fn conflicting_volume_names_are_rejected() {
    let files = [
        file_spec("X:\\vm0.vhdx", None, false),
        file_spec("X:\\vm1.vhdx", None, false),
    ];

    assert!(matches!(
        VolumeMap::resolve(&files, &ConflictingCluster),
        Err(VolumeError::VolumeNameConflict { .. })
    ));
}
