//! Copy engines for [`Handle`](bytemover_handle::Handle) streams.
//!
//! [`BufferedTransfer`] overlaps reading and writing with a pool of slots and
//! a dedicated writer thread; [`save_into`] picks it or a single-buffer loop.
//! Both resume from the offset carried by a
//! [`HandleError::Restart`](bytemover_handle::HandleError::Restart).

mod buffered;
mod checksum;
mod config;
mod metrics;
mod progress;
mod retry;
mod save;
mod types;
mod watcher;

#[cfg(test)]
mod testing;

pub use buffered::BufferedTransfer;
pub use checksum::{ChecksumWatcher, checksum_bytes, checksum_handle};
pub use config::TransferConfig;
pub use metrics::{MetricValue, MetricsSink, RecordingMetrics, TracingMetrics};
pub use progress::{ProgressCallback, ProgressTracker, SpeedCalculator};
pub use save::{compare, copy_to, save_into};
pub use types::{TransferProgress, TransferReport, TransferSession, TransferStatus};
pub use watcher::{NoopWatcher, TransferWatcher};

use bytemover_handle::HandleError;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("reading source failed at byte {offset}: {source}")]
    Source { offset: u64, source: HandleError },

    #[error("writing target failed at byte {offset}: {source}")]
    Target { offset: u64, source: HandleError },

    /// Reader and writer disagree on the byte count with no failure recorded.
    #[error("read {read} bytes but wrote {written}")]
    Inconsistent { read: u64, written: u64 },

    #[error("copied {copied} bytes, expected {estimate}")]
    ShortTransfer { copied: u64, estimate: u64 },

    #[error("giving up at byte {offset} after {restarts} restarts")]
    RestartsExhausted { offset: u64, restarts: u32 },

    #[error("contract violation: {0}")]
    Contract(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error(transparent)]
    Handle(#[from] HandleError),
}

impl TransferError {
    /// Byte offset the failure is attached to, when known.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::Source { offset, .. }
            | Self::Target { offset, .. }
            | Self::RestartsExhausted { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}
