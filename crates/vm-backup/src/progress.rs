//! Progress notifications and cooperative cancellation.
//!

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The shared cancellation flag.
///
/// Settable asynchronously (a termination signal) and synchronously (a
/// progress callback); writes are atomic so they are visible across the
/// calling and callback contexts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not yet set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One phase transition in the backup pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressPhase {
    /// The run is resolving workloads.
    Initializing,

    /// A snapshot set is about to be created over these component captions.
    SnapshotStarting {
        /// The captions of the participating components.
        components: Vec<String>,
    },

    /// The point-in-time cut completed over these mount paths.
    SnapshotDone {
        /// The mount paths covered by the set.
        mount_paths: Vec<String>,
    },

    /// An archive is about to be written.
    ArchiveStarting {
        /// The archive file name.
        archive: String,
    },

    /// An entry save is starting.
    EntryStarting {
        /// The archive-relative entry name.
        entry: String,
    },

    /// Bytes of the current entry were transferred.
    EntryProgress {
        /// The archive-relative entry name.
        entry: String,
        /// Bytes transferred so far.
        bytes: u64,
        /// The entry's total size.
        total_bytes: u64,
    },

    /// An archive was fully written.
    ArchiveDone {
        /// The archive file name.
        archive: String,
    },

    /// The snapshot set is being deleted.
    SnapshotDeleting,
}

/// A notification passed to the caller's progress callback.
///
/// The callback may set `cancel` to request early termination; the field is
/// read immediately after each invocation.
#[derive(Debug)]
pub struct ProgressEvent {
    /// The phase transition.
    pub phase: ProgressPhase,

    /// Set by the callback to request cancellation.
    pub cancel: bool,
}

/// Invokes the caller's progress callback and folds its cancel requests into
/// the shared flag.
pub struct Reporter<'cb> {
    callback: &'cb mut dyn FnMut(&mut ProgressEvent),
    cancel: CancelFlag,
}

impl<'cb> Reporter<'cb> {
    /// A reporter over the caller's callback and shared cancel flag.
    pub fn new(callback: &'cb mut dyn FnMut(&mut ProgressEvent), cancel: CancelFlag) -> Self {
        Self { callback, cancel }
    }

    /// Emit one event synchronously on the calling thread.
    pub fn emit(&mut self, phase: ProgressPhase) {
        let mut event = ProgressEvent {
            phase,
            cancel: false,
        };

        (self.callback)(&mut event);

        if event.cancel {
            self.cancel.set();
        }
    }

    /// Whether cancellation was requested through either channel.
    pub fn cancelled(&self) -> bool {
        self.cancel.is_set()
    }
}
