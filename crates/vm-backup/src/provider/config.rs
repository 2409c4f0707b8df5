//! Config-backed snapshot provider.
//!
//! Components and file specs come from the local config file and the frozen
//! device path of every volume is its live mount path. There is no real
//! point-in-time cut, so archives are crash-consistent only when the
//! workload is powered off; a hypervisor-native provider replaces this
//! implementation on hosts that have one.

use crate::config::WorkloadConfig;

use super::{Component, ProviderError, SnapshotId, SnapshotProvider, SnapshotSetId};

/// Snapshot provider whose writer metadata is declared in `config.toml`.
#[derive(Debug, Default)]
pub struct ConfigProvider {
    components: Vec<Component>,
    set: Option<SnapshotSetId>,
    snapshots: Vec<(SnapshotId, String)>,
    next_set: u64,
    next_snapshot: u64,
}

impl ConfigProvider {
    /// Build the provider from the configured workloads. Components without
    /// a caption inherit their name so catalog matching stays consistent.
    pub fn new(workloads: &[WorkloadConfig]) -> Self {
        let components = workloads
            .iter()
            .flat_map(|workload| workload.components.iter().cloned())
            .map(|mut component| {
                if component.caption.is_empty() {
                    component.caption = component.name.clone();
                }
                component
            })
            .collect();

        Self {
            components,
            ..Self::default()
        }
    }

    fn require_set(&self, operation: &'static str) -> Result<SnapshotSetId, ProviderError> {
        self.set
            .ok_or_else(|| ProviderError::new(operation, "no snapshot set was started"))
    }
}

impl SnapshotProvider for ConfigProvider {
    fn initialize(&mut self) -> Result<(), ProviderError> {
        self.set = None;
        self.snapshots.clear();
        Ok(())
    }

    fn gather_metadata(&mut self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn components(&self) -> Result<Vec<Component>, ProviderError> {
        Ok(self.components.clone())
    }

    fn select_component(&mut self, component: &Component) -> Result<(), ProviderError> {
        if self.components.iter().any(|c| c.name == component.name) {
            Ok(())
        } else {
            Err(ProviderError::new(
                "select component",
                format!("'{}' is not a configured component", component.name),
            ))
        }
    }

    fn start_snapshot_set(&mut self) -> Result<SnapshotSetId, ProviderError> {
        self.next_set += 1;
        let set = SnapshotSetId(self.next_set);
        self.set = Some(set);
        self.snapshots.clear();
        Ok(set)
    }

    fn add_volume(&mut self, volume_name: &str) -> Result<SnapshotId, ProviderError> {
        self.require_set("add volume to snapshot set")?;

        self.next_snapshot += 1;
        let snapshot = SnapshotId(self.next_snapshot);
        self.snapshots.push((snapshot, volume_name.to_string()));
        Ok(snapshot)
    }

    fn prepare_for_backup(&mut self) -> Result<(), ProviderError> {
        self.require_set("prepare for backup")?;
        Ok(())
    }

    fn create_snapshots(&mut self) -> Result<(), ProviderError> {
        self.require_set("create snapshots")?;
        Ok(())
    }

    fn device_path(&self, snapshot: SnapshotId) -> Result<String, ProviderError> {
        self.snapshots
            .iter()
            .find(|(id, _)| *id == snapshot)
            .map(|(_, volume)| volume.clone())
            .ok_or_else(|| ProviderError::new("query device path", "unknown snapshot id"))
    }

    fn mark_component_succeeded(&mut self, component: &Component) -> Result<(), ProviderError> {
        self.select_component(component)
    }

    fn complete_backup(&mut self) -> Result<(), ProviderError> {
        self.require_set("complete backup")?;
        Ok(())
    }

    fn delete_snapshot_set(
        &mut self,
        set: SnapshotSetId,
        _force: bool,
    ) -> Result<(), ProviderError> {
        if self.set != Some(set) {
            return Err(ProviderError::new(
                "delete snapshot set",
                "unknown snapshot set id",
            ));
        }

        self.set = None;
        self.snapshots.clear();
        Ok(())
    }
}
