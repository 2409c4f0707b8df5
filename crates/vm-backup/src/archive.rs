//! Streams a component's files, read through the frozen snapshot, into a
//! compressed tar archive.
//!

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Read},
    path::PathBuf,
};

use chrono::Utc;
use flate2::{Compression, write::GzEncoder};
use glob::Pattern;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    progress::{ProgressPhase, Reporter},
    provider::{Component, FileSpec},
    volume::{VolumeError, VolumeMap},
};

/// Granularity of byte-level progress notifications during an entry save.
const PROGRESS_CHUNK_BYTES: u64 = 64 * 1024;

/// Destination settings shared by every archive in one run.
#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    /// The destination directory; must already exist.
    pub output_dir: PathBuf,

    /// The archive file name template. `{vm}`, `{component}` and
    /// `{timestamp}` are substituted.
    pub name_template: String,

    /// Gzip compression level, 0-9 inclusive.
    pub compression_level: i64,
}

/// Validate an archive compression level. The valid range is 0-9 inclusive.
pub fn compression(level: i64) -> Result<Compression, ArchiveError> {
    u32::try_from(level)
        .ok()
        .filter(|level| *level <= 9)
        .map(Compression::new)
        .ok_or(ArchiveError::InvalidCompressionLevel(level))
}

/// Write one archive for `component`, mirroring the live directory layout
/// while reading every byte through the volume's frozen device path.
///
/// The output is deterministic: entries are saved in sorted-name order. An
/// existing archive at the destination is overwritten, never appended to.
/// Cancellation aborts the save between entries; the partial archive is
/// removed and every open handle closed before [`ArchiveError::Cancelled`]
/// surfaces. The caller's `registry` holds the frozen-file handles for the
/// duration of the call and is empty again on return, on every path.
pub fn write_component_archive(
    workload_name: &str,
    component: &Component,
    volumes: &VolumeMap,
    device_paths: &BTreeMap<String, String>,
    settings: &ArchiveSettings,
    registry: &mut HandleRegistry,
    reporter: &mut Reporter<'_>,
) -> Result<PathBuf, ArchiveError> {
    if !settings.output_dir.is_dir() {
        return Err(ArchiveError::InvalidOutputPath(settings.output_dir.clone()));
    }
    let level = compression(settings.compression_level)?;

    let file_name = settings
        .name_template
        .replace("{vm}", workload_name)
        .replace("{component}", &component.name)
        .replace(
            "{timestamp}",
            &Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string(),
        );
    let archive_path = settings.output_dir.join(&file_name);

    // Overwrite, never append.
    if archive_path.exists() {
        fs::remove_file(&archive_path)
            .map_err(|e| ArchiveError::Io(e, "remove existing archive"))?;
    }

    reporter.emit(ProgressPhase::ArchiveStarting {
        archive: file_name.clone(),
    });

    // Handles stay registered for the whole save; the archive reads them
    // lazily as entries are appended.
    let result = save_entries(
        &archive_path,
        level,
        component,
        volumes,
        device_paths,
        registry,
        reporter,
    );

    // Every handle is released exactly once, before any error or the
    // cancellation outcome surfaces.
    registry.close_all();
    debug_assert_eq!(registry.open_count(), 0);

    match result {
        Ok(()) => {
            info!("Wrote archive {archive_path:?}");
            reporter.emit(ProgressPhase::ArchiveDone { archive: file_name });
            Ok(archive_path)
        }
        Err(error) => {
            // A truncated archive must not be left behind looking valid.
            if let Err(remove_error) = fs::remove_file(&archive_path) {
                if remove_error.kind() != io::ErrorKind::NotFound {
                    warn!("Could not remove partial archive {archive_path:?}: {remove_error}");
                }
            }

            Err(error)
        }
    }
}

fn save_entries(
    archive_path: &std::path::Path,
    level: Compression,
    component: &Component,
    volumes: &VolumeMap,
    device_paths: &BTreeMap<String, String>,
    registry: &mut HandleRegistry,
    reporter: &mut Reporter<'_>,
) -> Result<(), ArchiveError> {
    let file =
        File::create(archive_path).map_err(|e| ArchiveError::Io(e, "create archive file"))?;
    let encoder = GzEncoder::new(file, level);
    let mut builder = tar::Builder::new(encoder);

    let mut entries = Vec::new();
    for spec in &component.files {
        collect_spec(spec, volumes, device_paths, registry, &mut entries)?;
    }

    // Deterministic output: entries are saved in sorted-name order even
    // though handles were acquired in recursion order.
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    for entry in entries {
        // The cancel flag is honored between entries, never mid-entry.
        if reporter.cancelled() {
            return Err(ArchiveError::Cancelled);
        }

        reporter.emit(ProgressPhase::EntryStarting {
            entry: entry.name.clone(),
        });

        match entry.source {
            EntrySource::Directory => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                builder
                    .append_data(&mut header, &entry.name, io::empty())
                    .map_err(|e| ArchiveError::Io(e, "append directory entry"))?;
            }
            EntrySource::File { handle, size } => {
                let file = registry
                    .take(handle)
                    .expect("every registered handle is consumed exactly once");

                let entry_name = entry.name.clone();
                let mut on_progress = |bytes| {
                    reporter.emit(ProgressPhase::EntryProgress {
                        entry: entry_name.clone(),
                        bytes,
                        total_bytes: size,
                    });
                };

                let mut header = tar::Header::new_gnu();
                header.set_size(size);
                header.set_mode(0o644);
                builder
                    .append_data(
                        &mut header,
                        &entry.name,
                        ProgressReader::new(file, &mut on_progress),
                    )
                    .map_err(|e| ArchiveError::Io(e, "append file entry"))?;
            }
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| ArchiveError::Io(e, "finish archive"))?;
    encoder
        .finish()
        .map_err(|e| ArchiveError::Io(e, "flush archive"))?;

    Ok(())
}

/// Resolve one file spec's owning volume and collect its entries.
fn collect_spec(
    spec: &FileSpec,
    volumes: &VolumeMap,
    device_paths: &BTreeMap<String, String>,
    registry: &mut HandleRegistry,
    entries: &mut Vec<PendingEntry>,
) -> Result<(), ArchiveError> {
    let (mount, volume_name) = volumes.owning_mount(&spec.path)?;
    let device_root = device_paths
        .get(volume_name)
        .ok_or_else(|| ArchiveError::MissingDevicePath(volume_name.to_string()))?;

    let pattern = spec
        .spec
        .as_deref()
        .map(Pattern::new)
        .transpose()?;

    collect_tree(
        device_root,
        mount.len(),
        &spec.path,
        pattern.as_ref(),
        spec.recursive,
        registry,
        entries,
    )
}

/// Recursively mirror the live tree.
///
/// Archive-relative names and recursion are derived from the live path;
/// metadata and bytes come from the frozen device path, obtained by
/// substituting the mount-path prefix with the frozen root.
fn collect_tree(
    device_root: &str,
    live_prefix_len: usize,
    live_path: &str,
    pattern: Option<&Pattern>,
    recursive: bool,
    registry: &mut HandleRegistry,
    entries: &mut Vec<PendingEntry>,
) -> Result<(), ArchiveError> {
    let frozen = frozen_path(device_root, live_prefix_len, live_path);
    let metadata = fs::metadata(&frozen).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            ArchiveError::EntryNotFound(frozen.clone())
        } else {
            ArchiveError::Io(e, "read frozen metadata")
        }
    })?;

    let name = archive_name(live_prefix_len, live_path);

    if metadata.is_dir() {
        if !name.is_empty() {
            entries.push(PendingEntry {
                name,
                source: EntrySource::Directory,
            });
        }

        let directory =
            fs::read_dir(&frozen).map_err(|e| ArchiveError::Io(e, "read frozen directory"))?;
        for child in directory {
            let child = child.map_err(|e| ArchiveError::Io(e, "read frozen directory entry"))?;
            let Some(child_name) = child.file_name().to_str().map(str::to_string) else {
                return Err(ArchiveError::NotUnicode(child.path()));
            };

            let child_type = child
                .file_type()
                .map_err(|e| ArchiveError::Io(e, "read frozen entry type"))?;
            if child_type.is_dir() && !recursive {
                continue;
            }
            if child_type.is_file() {
                if let Some(pattern) = pattern {
                    if !pattern.matches(&child_name) {
                        continue;
                    }
                }
            }

            let child_live = join_live(live_path, &child_name);
            collect_tree(
                device_root,
                live_prefix_len,
                &child_live,
                pattern,
                recursive,
                registry,
                entries,
            )?;
        }
    } else {
        if name.is_empty() {
            return Ok(());
        }

        let file = File::open(&frozen).map_err(|e| ArchiveError::Io(e, "open frozen file"))?;
        let handle = registry.register(file);
        entries.push(PendingEntry {
            name,
            source: EntrySource::File {
                handle,
                size: metadata.len(),
            },
        });
    }

    Ok(())
}

/// Substitute the live mount-path prefix with the frozen device root.
fn frozen_path(device_root: &str, live_prefix_len: usize, live_path: &str) -> String {
    let suffix = live_path
        .get(live_prefix_len..)
        .unwrap_or_default()
        .trim_start_matches(['/', '\\']);
    let root = device_root.trim_end_matches(['/', '\\']);

    if suffix.is_empty() {
        if root.is_empty() {
            // Device root was the filesystem root.
            return device_root.to_string();
        }
        return root.to_string();
    }

    let separator = if device_root.contains('\\') { '\\' } else { '/' };
    format!("{root}{separator}{suffix}")
}

/// The archive-relative name: the live path with the mount prefix stripped.
fn archive_name(live_prefix_len: usize, live_path: &str) -> String {
    live_path
        .get(live_prefix_len..)
        .unwrap_or_default()
        .trim_matches(['/', '\\'])
        .replace('\\', "/")
}

fn join_live(live_path: &str, child: &str) -> String {
    let separator = if live_path.contains('\\') { '\\' } else { '/' };
    format!(
        "{}{separator}{child}",
        live_path.trim_end_matches(['/', '\\'])
    )
}

#[derive(Debug)]
enum EntrySource {
    Directory,
    File { handle: usize, size: u64 },
}

#[derive(Debug)]
struct PendingEntry {
    name: String,
    source: EntrySource,
}

/// The open frozen-file read handles of one archive call, each closed
/// exactly once.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    handles: Vec<Option<File>>,
}

impl HandleRegistry {
    fn register(&mut self, file: File) -> usize {
        self.handles.push(Some(file));
        self.handles.len() - 1
    }

    fn take(&mut self, index: usize) -> Option<File> {
        self.handles.get_mut(index)?.take()
    }

    fn close_all(&mut self) {
        self.handles.clear();
    }

    /// The number of handles still open.
    pub fn open_count(&self) -> usize {
        self.handles.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Reports cumulative bytes read at [`PROGRESS_CHUNK_BYTES`] granularity.
struct ProgressReader<'cb, R> {
    inner: R,
    on_progress: &'cb mut dyn FnMut(u64),
    bytes: u64,
    reported: u64,
}

impl<'cb, R: Read> ProgressReader<'cb, R> {
    fn new(inner: R, on_progress: &'cb mut dyn FnMut(u64)) -> Self {
        Self {
            inner,
            on_progress,
            bytes: 0,
            reported: 0,
        }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;

        self.bytes += u64::try_from(read).unwrap_or(u64::MAX);
        let finished = read == 0 && self.bytes > self.reported;
        if self.bytes - self.reported >= PROGRESS_CHUNK_BYTES || finished {
            self.reported = self.bytes;
            (self.on_progress)(self.bytes);
        }

        Ok(read)
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Compression level {0} is outside the valid range 0-9")]
    InvalidCompressionLevel(i64),

    #[error("Output directory {0:?} does not exist")]
    InvalidOutputPath(PathBuf),

    #[error("Declared path does not exist under its frozen device path: '{0}'")]
    EntryNotFound(String),

    #[error("No frozen device path for volume '{0}'")]
    MissingDevicePath(String),

    #[error("File spec pattern is invalid:\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Path under the frozen device root is not valid unicode: {0:?}")]
    NotUnicode(PathBuf),

    #[error("Failed to {1}:\n{0}")]
    Io(#[source] io::Error, &'static str),

    #[error("Failed to resolve a declared path's volume:\n{0}")]
    Volume(#[from] VolumeError),

    #[error("Backup cancelled")]
    Cancelled,
}
