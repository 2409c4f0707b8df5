//! Mock snapshot provider for exercising the orchestration pipeline.
//!

use std::collections::BTreeMap;

use super::{Component, ProviderError, SnapshotId, SnapshotProvider, SnapshotSetId};

/// Mock a snapshot provider.
///
/// Records every call in order, can fail on a chosen operation, and maps
/// volume names to caller-supplied frozen device paths.
#[derive(Debug, Default)]
pub struct MockProvider {
    /// The components the fake writer declares.
    pub components: Vec<Component>,

    /// Frozen device path per volume name.
    pub device_paths: BTreeMap<String, String>,

    /// Operation name to fail on, if any.
    pub fail_on: Option<&'static str>,

    /// Every provider call, in order.
    pub log: Vec<String>,

    set: Option<SnapshotSetId>,
    snapshots: Vec<(SnapshotId, String)>,
    next_set: u64,
    next_snapshot: u64,
}

impl MockProvider {
    /// A mock declaring `components`, with frozen device paths per volume.
    pub fn new(components: Vec<Component>, device_paths: BTreeMap<String, String>) -> Self {
        Self {
            components,
            device_paths,
            ..Self::default()
        }
    }

    fn record(&mut self, operation: &'static str, detail: String) -> Result<(), ProviderError> {
        if detail.is_empty() {
            self.log.push(operation.to_string());
        } else {
            self.log.push(format!("{operation}({detail})"));
        }

        if self.fail_on == Some(operation) {
            return Err(ProviderError::new(operation, "injected failure"));
        }

        Ok(())
    }
}

impl SnapshotProvider for MockProvider {
    fn initialize(&mut self) -> Result<(), ProviderError> {
        self.set = None;
        self.snapshots.clear();
        self.record("initialize", String::new())
    }

    fn gather_metadata(&mut self) -> Result<(), ProviderError> {
        self.record("gather_metadata", String::new())
    }

    fn components(&self) -> Result<Vec<Component>, ProviderError> {
        if self.fail_on == Some("components") {
            return Err(ProviderError::new("components", "injected failure"));
        }
        Ok(self.components.clone())
    }

    fn select_component(&mut self, component: &Component) -> Result<(), ProviderError> {
        let name = component.name.clone();
        self.record("select_component", name)
    }

    fn start_snapshot_set(&mut self) -> Result<SnapshotSetId, ProviderError> {
        self.record("start_snapshot_set", String::new())?;

        self.next_set += 1;
        let set = SnapshotSetId(self.next_set);
        self.set = Some(set);
        self.snapshots.clear();
        Ok(set)
    }

    fn add_volume(&mut self, volume_name: &str) -> Result<SnapshotId, ProviderError> {
        self.record("add_volume", volume_name.to_string())?;

        self.next_snapshot += 1;
        let snapshot = SnapshotId(self.next_snapshot);
        self.snapshots.push((snapshot, volume_name.to_string()));
        Ok(snapshot)
    }

    fn prepare_for_backup(&mut self) -> Result<(), ProviderError> {
        self.record("prepare_for_backup", String::new())
    }

    fn create_snapshots(&mut self) -> Result<(), ProviderError> {
        self.record("create_snapshots", String::new())
    }

    fn device_path(&self, snapshot: SnapshotId) -> Result<String, ProviderError> {
        let volume = self
            .snapshots
            .iter()
            .find(|(id, _)| *id == snapshot)
            .map(|(_, volume)| volume.as_str())
            .ok_or_else(|| ProviderError::new("query device path", "unknown snapshot id"))?;

        self.device_paths
            .get(volume)
            .cloned()
            .ok_or_else(|| {
                ProviderError::new(
                    "query device path",
                    format!("no frozen device path for volume '{volume}'"),
                )
            })
    }

    fn mark_component_succeeded(&mut self, component: &Component) -> Result<(), ProviderError> {
        let name = component.name.clone();
        self.record("mark_component_succeeded", name)
    }

    fn complete_backup(&mut self) -> Result<(), ProviderError> {
        self.record("complete_backup", String::new())
    }

    fn delete_snapshot_set(
        &mut self,
        set: SnapshotSetId,
        force: bool,
    ) -> Result<(), ProviderError> {
        self.record("delete_snapshot_set", format!("force={force}"))?;

        if self.set.take() != Some(set) {
            return Err(ProviderError::new(
                "delete snapshot set",
                "unknown snapshot set id",
            ));
        }

        self.snapshots.clear();
        Ok(())
    }
}
