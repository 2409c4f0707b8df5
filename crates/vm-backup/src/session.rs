//! The snapshot-set lifecycle for one partition of workloads.
//!

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    catalog::Workload,
    cluster::ClusterVolumes,
    progress::{ProgressPhase, Reporter},
    provider::{Component, ProviderError, SnapshotId, SnapshotProvider, SnapshotSetId},
    volume::{VolumeError, VolumeMap},
};

/// A component selected for backup together with its owning workload.
#[derive(Debug, Clone)]
pub struct SelectedComponent {
    /// The workload the component belongs to.
    pub workload: Workload,

    /// The component as declared by the writer.
    pub component: Component,
}

/// One snapshot-set lifecycle.
///
/// The session drives the provider through metadata gathering, component
/// selection, volume registration and the point-in-time cut. Once the set
/// exists, teardown is guaranteed: it is force-deleted either by
/// [`Self::commit`] or, on any other exit path, when the session drops.
pub struct SnapshotSession<'p, P: SnapshotProvider> {
    provider: &'p mut P,
    selected: Vec<SelectedComponent>,
    volumes: VolumeMap,
    set: Option<SnapshotSetId>,
    snapshots: BTreeMap<String, SnapshotId>,
    deleted: bool,
}

impl<'p, P: SnapshotProvider> SnapshotSession<'p, P> {
    /// Drive a new session up to the snapshots-created state.
    ///
    /// Fails with [`SessionError::NoComponentsSelected`] when no catalog
    /// component matches a requested workload; callers should treat that as
    /// an empty partition, not a fatal error.
    pub fn begin(
        provider: &'p mut P,
        cluster: &dyn ClusterVolumes,
        workloads: &[Workload],
        reporter: &mut Reporter<'_>,
    ) -> Result<Self, SessionError> {
        provider.initialize()?;
        provider.gather_metadata()?;

        // Select every writer component owned by a requested workload and
        // build the volume map from their file specs in the same pass.
        let mut selected = Vec::new();
        let mut files = Vec::new();
        for component in provider.components()? {
            let Some(workload) = workloads
                .iter()
                .find(|w| component.name == w.name || component.caption == w.name)
            else {
                continue;
            };

            provider.select_component(&component)?;
            files.extend(component.files.iter().cloned());
            selected.push(SelectedComponent {
                workload: workload.clone(),
                component,
            });
        }

        if selected.is_empty() {
            return Err(SessionError::NoComponentsSelected);
        }

        let volumes = VolumeMap::resolve(&files, cluster)?;

        reporter.emit(ProgressPhase::SnapshotStarting {
            components: selected
                .iter()
                .map(|s| s.component.caption.clone())
                .collect(),
        });

        let mut session = Self {
            provider,
            selected,
            volumes,
            set: None,
            snapshots: BTreeMap::new(),
            deleted: false,
        };

        // A partially created set must still be deleted before the error
        // propagates.
        if let Err(error) = session.create_set() {
            session.teardown();
            return Err(error.into());
        }

        reporter.emit(ProgressPhase::SnapshotDone {
            mount_paths: session.volumes.mount_paths().map(str::to_string).collect(),
        });

        Ok(session)
    }

    /// Start the set, add every distinct volume, prepare, then cut.
    /// Membership accumulates fully before the set is created.
    fn create_set(&mut self) -> Result<(), ProviderError> {
        let set = self.provider.start_snapshot_set()?;
        self.set = Some(set);

        for volume_name in self.volumes.volume_names() {
            let snapshot = self.provider.add_volume(&volume_name)?;
            self.snapshots.insert(volume_name, snapshot);
        }

        self.provider.prepare_for_backup()?;
        self.provider.create_snapshots()?;

        info!("Snapshot set created over {} volume(s)", self.snapshots.len());
        Ok(())
    }

    /// The selected components and their owning workloads.
    pub fn selected(&self) -> &[SelectedComponent] {
        &self.selected
    }

    /// The volume map for this partition.
    pub fn volumes(&self) -> &VolumeMap {
        &self.volumes
    }

    /// The frozen device path for every volume in the set.
    pub fn device_paths(&self) -> Result<BTreeMap<String, String>, ProviderError> {
        self.snapshots
            .iter()
            .map(|(volume, snapshot)| {
                Ok((volume.clone(), self.provider.device_path(*snapshot)?))
            })
            .collect()
    }

    /// Mark every component's backup as succeeded, signal backup-complete,
    /// then force-delete the set.
    pub fn commit(mut self, reporter: &mut Reporter<'_>) -> Result<(), SessionError> {
        for selected in &self.selected {
            self.provider.mark_component_succeeded(&selected.component)?;
        }
        self.provider.complete_backup()?;

        reporter.emit(ProgressPhase::SnapshotDeleting);
        self.delete()?;

        Ok(())
    }

    /// Force-delete the snapshot set. Non-forced deletion can leave orphaned
    /// shadow state behind.
    fn delete(&mut self) -> Result<(), ProviderError> {
        self.deleted = true;

        if let Some(set) = self.set.take() {
            self.provider.delete_snapshot_set(set, true)?;
        }

        Ok(())
    }

    fn teardown(&mut self) {
        if let Err(error) = self.delete() {
            warn!("Best-effort snapshot-set deletion failed: {error}");
        }
    }
}

impl<P: SnapshotProvider> Drop for SnapshotSession<'_, P> {
    fn drop(&mut self) {
        if !self.deleted {
            warn!("Snapshot set still present at drop, deleting");
            self.teardown();
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No catalog component matched the requested workloads")]
    NoComponentsSelected,

    #[error("Snapshot provider call failed:\n{0}")]
    Provider(#[from] ProviderError),

    #[error("Failed to resolve volumes:\n{0}")]
    Volume(#[from] VolumeError),
}
