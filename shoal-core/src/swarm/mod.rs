//! Multi-source swarm downloading.
//!
//! A download is split across many sources by the [`SwarmCoordinator`],
//! which hands out disjoint byte-range leases. Each source is driven by a
//! [`SourceDownloader`] that turns leases into range requests, and each
//! response is checked and streamed to storage by a [`ContentListener`].

mod coordinator;
mod downloader;
mod file;
mod lifecycle;
mod listener;
mod selector;
mod source;
mod verifier;
mod write_job;

use std::fmt;

pub use coordinator::{CoordinatorEvent, LeaseSnapshot, SwarmCoordinator};
pub use downloader::{DownloaderState, SourceDownloader};
pub use file::{SwarmFile, SwarmFileSystem};
pub use lifecycle::{
    PolicyAction, ReconnectingPolicy, SourceContext, SourceEvent, SourceNotification,
    SourcePolicy, SourceStatus, StatusClass,
};
pub use listener::{ContentError, ContentListener, ContentRange};
pub use selector::{ContiguousSelector, SelectionStrategy};
pub use source::{SourceId, SwarmSource};
pub use verifier::{BlockVerifier, NoVerification, Sha1BlockVerifier, VerifierError};
pub use write_job::WriteJob;

use crate::range::Range;
use crate::storage::StorageError;

/// State a byte must be in for a coordinator transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Needed,
    Leased,
    Pending,
    Written,
    Verified,
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LeaseState::Needed => "needed",
            LeaseState::Leased => "leased",
            LeaseState::Pending => "pending",
            LeaseState::Written => "written",
            LeaseState::Verified => "verified",
        };
        f.write_str(name)
    }
}

/// Errors from lease bookkeeping and download layout.
///
/// Lease errors signal a caller bug; the coordinator rejects the
/// operation without touching its state.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("Cannot renew lease {old} as {new}: new range must lie inside the old one")]
    InvalidRenewal { old: Range, new: Range },

    #[error("Cannot unlease {range}: it holds completed bytes")]
    UnleaseCompleted { range: Range },

    #[error("Bytes {range} are not all {expected}")]
    InvalidTransition { range: Range, expected: LeaseState },

    #[error("Offset {offset} is outside the {total}-byte download")]
    OutOfBounds { offset: u64, total: u64 },

    #[error("Invalid download layout: {reason}")]
    InvalidLayout { reason: String },

    #[error("Invalid source {url}: {reason}")]
    InvalidSource { url: String, reason: String },

    #[error("Write job already closed")]
    WriteJobClosed,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
