//! The top-level backup driver.
//!

use std::{collections::BTreeMap, path::PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    archive::{self, ArchiveError, ArchiveSettings, HandleRegistry},
    catalog::{CatalogError, NameFilter, NameKind, Workload, WorkloadCatalog},
    cluster::ClusterVolumes,
    progress::{ProgressPhase, Reporter},
    provider::{ProviderError, SnapshotProvider},
    session::{SessionError, SnapshotSession},
};

/// One backup run's parameters.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    /// Requested workload names; empty targets every catalog workload.
    pub workload_names: Vec<String>,

    /// Whether names match stable identifiers or display names.
    pub name_kind: NameKind,

    /// The destination directory; must already exist.
    pub output_dir: PathBuf,

    /// The archive name template. `{vm}`, `{component}` and `{timestamp}`
    /// are substituted.
    pub name_template: String,

    /// Snapshot all workloads through one shared set, minimizing
    /// point-in-time skew, instead of one set per workload.
    pub single_snapshot: bool,

    /// Gzip compression level, 0-9.
    pub compression_level: i64,
}

/// Run one backup over the requested workloads.
///
/// Workloads are partitioned into one shared snapshot session or one session
/// each, processed sequentially. Returns the resolved workload id → name map
/// so the caller can detect requested names that matched nothing.
pub fn run<P: SnapshotProvider>(
    provider: &mut P,
    catalog: &dyn WorkloadCatalog,
    cluster: &dyn ClusterVolumes,
    request: &BackupRequest,
    reporter: &mut Reporter<'_>,
) -> Result<BTreeMap<String, String>, BackupError> {
    // Validation failures must precede any snapshot work.
    archive::compression(request.compression_level)?;
    if !request.output_dir.is_dir() {
        return Err(ArchiveError::InvalidOutputPath(request.output_dir.clone()).into());
    }

    reporter.emit(ProgressPhase::Initializing);

    let filter = (!request.workload_names.is_empty()).then(|| NameFilter {
        names: request.workload_names.clone(),
        kind: request.name_kind,
    });
    let workloads = catalog.query(filter.as_ref())?;
    info!("Resolved {} workload(s)", workloads.len());

    let settings = ArchiveSettings {
        output_dir: request.output_dir.clone(),
        name_template: request.name_template.clone(),
        compression_level: request.compression_level,
    };

    if request.single_snapshot {
        run_partition(provider, cluster, &workloads, &settings, reporter)?;
    } else {
        // One workload's failure must not prevent the remaining workloads
        // from being backed up; the first error still fails the run.
        let mut first_error = None;
        for workload in &workloads {
            match run_partition(
                provider,
                cluster,
                core::slice::from_ref(workload),
                &settings,
                reporter,
            ) {
                Ok(()) => {}
                Err(BackupError::Cancelled) => return Err(BackupError::Cancelled),
                Err(error) => {
                    error!("Backing up '{}' failed: {error}", workload.name);
                    first_error.get_or_insert(error);
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }
    }

    // Unmatched requested names are warnings, never failures.
    for name in &request.workload_names {
        let matched = workloads.iter().any(|workload| match request.name_kind {
            NameKind::Id => workload.id == *name,
            NameKind::DisplayName => workload.name == *name,
        });
        if !matched {
            warn!("Requested workload '{name}' did not match any catalog workload");
        }
    }

    Ok(workloads
        .into_iter()
        .map(|workload| (workload.id, workload.name))
        .collect())
}

/// Process one partition: snapshot, archive every selected component, commit.
fn run_partition<P: SnapshotProvider>(
    provider: &mut P,
    cluster: &dyn ClusterVolumes,
    workloads: &[Workload],
    settings: &ArchiveSettings,
    reporter: &mut Reporter<'_>,
) -> Result<(), BackupError> {
    let session = match SnapshotSession::begin(provider, cluster, workloads, reporter) {
        Ok(session) => session,
        Err(SessionError::NoComponentsSelected) => {
            // Nothing to do for this partition.
            warn!("No snapshot component matched this partition, skipping");
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    let device_paths = session.device_paths()?;
    let mut registry = HandleRegistry::default();

    for selected in session.selected().to_vec() {
        match archive::write_component_archive(
            &selected.workload.name,
            &selected.component,
            session.volumes(),
            &device_paths,
            settings,
            &mut registry,
            reporter,
        ) {
            Ok(_) => {}
            Err(ArchiveError::Cancelled) => return Err(BackupError::Cancelled),
            Err(error) => return Err(error.into()),
        }

        // An asynchronous cancel request never aborts an in-flight archive;
        // it is honored once the current one completes.
        if reporter.cancelled() {
            return Err(BackupError::Cancelled);
        }
    }

    session.commit(reporter)?;
    Ok(())
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Failed to query the workload catalog:\n{0}")]
    Catalog(#[from] CatalogError),

    #[error("Snapshot session failed:\n{0}")]
    Session(#[from] SessionError),

    #[error("Snapshot provider call failed:\n{0}")]
    Provider(#[from] ProviderError),

    #[error("Failed to write archive:\n{0}")]
    Archive(#[from] ArchiveError),

    #[error("Backup cancelled")]
    Cancelled,
}
