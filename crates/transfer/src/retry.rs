//! Restart bookkeeping shared by the copy engines.

use std::sync::Arc;

use bytemover_handle::{Handle, HandleError};
use tracing::warn;

use crate::{TransferError, TransferSession, TransferWatcher};

/// Why an attempt stopped early.
#[derive(Debug)]
pub(crate) enum Interrupt {
    /// Resumable; the value is the offset the failing side reported.
    Restart(u64),
    Fatal(TransferError),
}

impl Interrupt {
    pub(crate) fn from_source(err: HandleError, offset: u64) -> Self {
        match err.resume_offset() {
            Some(at) => Self::Restart(at),
            None => Self::Fatal(TransferError::Source {
                offset,
                source: err,
            }),
        }
    }

    pub(crate) fn from_target(err: HandleError, offset: u64) -> Self {
        match err.resume_offset() {
            Some(at) => Self::Restart(at),
            None => Self::Fatal(TransferError::Target {
                offset,
                source: err,
            }),
        }
    }
}

/// Counts restarts against an optional limit and rewinds both handles.
pub(crate) struct Retry<'a> {
    max: Option<u32>,
    restarts: u32,
    session: Option<&'a Arc<TransferSession>>,
}

impl<'a> Retry<'a> {
    pub(crate) fn new(max: Option<u32>, session: Option<&'a Arc<TransferSession>>) -> Self {
        Self {
            max,
            restarts: 0,
            session,
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.restarts + 1
    }

    /// Puts `source` and `target` back at `offset` for another attempt.
    pub(crate) fn resume(
        &mut self,
        offset: u64,
        source: &mut dyn Handle,
        target: &mut dyn Handle,
        watcher: &mut dyn TransferWatcher,
    ) -> Result<(), TransferError> {
        self.restarts += 1;
        if let Some(max) = self.max {
            if self.restarts > max {
                return Err(TransferError::RestartsExhausted {
                    offset,
                    restarts: max,
                });
            }
        }
        warn!(offset, restarts = self.restarts, "retrying transfer");
        source
            .restart_read_from(offset)
            .map_err(|source| TransferError::Source { offset, source })?;
        target
            .restart_write_from(offset)
            .map_err(|source| TransferError::Target { offset, source })?;
        watcher.restart_from(offset);
        if let Some(session) = self.session {
            session.restart_from(offset);
        }
        Ok(())
    }
}
