//! The polymorphic stream contract.
//!
//! Every backend and decorator implements [`Handle`]. Callers open a handle
//! before any `read`/`write`/`seek` and close it exactly once on every exit
//! path; [`close_after`] and [`with_read`] take care of the second half.
//!
//! `read` and `write` return the number of bytes actually moved and callers
//! must loop: `read` returns `0` only at the true end of the stream. Failures
//! are always reported through [`HandleError`], never as a magic length.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::HandleError;
use crate::descriptor::HandleDescriptor;

/// Relocation cost hints: node name -> bytes that would move from/to it.
pub type CostMap = BTreeMap<String, u64>;

/// Closed set of handle kinds known to this workspace.
///
/// Merging is type-directed; [`HandleKind::may_merge`] is the compatibility
/// table checked before any downcast is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Memory,
    File,
    FileRange,
    Composite,
    Part,
    Peek,
    Window,
    /// Out-of-tree backends. Two custom handles decide between themselves.
    Custom,
}

impl HandleKind {
    /// Returns `true` if a handle of kind `self` may absorb one of kind `other`.
    pub fn may_merge(self, other: HandleKind) -> bool {
        matches!(
            (self, other),
            (HandleKind::FileRange, HandleKind::FileRange)
                | (HandleKind::Composite, HandleKind::Composite)
                | (HandleKind::Custom, HandleKind::Custom)
        )
    }
}

/// A virtual byte stream.
pub trait Handle: fmt::Debug + Send {
    /// Concrete kind, used for merge compatibility.
    fn kind(&self) -> HandleKind;

    /// Short diagnostic label.
    fn title(&self) -> String;

    /// Opens for reading and returns the estimated length (`0` = unknown).
    fn open_for_read(&mut self) -> Result<u64, HandleError>;

    /// Opens for writing; `estimate` is the expected length (`0` = unknown).
    fn open_for_write(&mut self, estimate: u64) -> Result<(), HandleError>;

    fn open_for_append(&mut self, _estimate: u64) -> Result<(), HandleError> {
        Err(HandleError::not_supported("open_for_append", self.title()))
    }

    /// Reads up to `buf.len()` bytes. `Ok(0)` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HandleError>;

    /// Writes up to `buf.len()` bytes and returns how many were accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize, HandleError>;

    fn close(&mut self) -> Result<(), HandleError>;

    fn flush(&mut self) -> Result<(), HandleError> {
        Err(HandleError::not_supported("flush", self.title()))
    }

    /// Exact size, when the backend can tell.
    fn size(&mut self) -> Result<u64, HandleError> {
        Err(HandleError::not_supported("size", self.title()))
    }

    /// Best-effort size; `0` means unknown.
    fn estimate(&self) -> u64 {
        0
    }

    fn position(&mut self) -> Result<u64, HandleError> {
        Err(HandleError::not_supported("position", self.title()))
    }

    fn seek(&mut self, _offset: u64) -> Result<u64, HandleError> {
        Err(HandleError::not_supported("seek", self.title()))
    }

    fn skip(&mut self, length: u64) -> Result<(), HandleError> {
        let here = self.position()?;
        self.seek(here + length)?;
        Ok(())
    }

    fn can_seek(&self) -> bool {
        false
    }

    fn rewind(&mut self) -> Result<(), HandleError> {
        Err(HandleError::not_supported("rewind", self.title()))
    }

    /// Puts the handle back in the state of a fresh read advanced to `offset`.
    fn restart_read_from(&mut self, offset: u64) -> Result<(), HandleError> {
        Err(HandleError::Contract(format!(
            "{} cannot restart reading from {offset}",
            self.title()
        )))
    }

    /// Puts the handle back in the state of a fresh write advanced to `offset`.
    fn restart_write_from(&mut self, offset: u64) -> Result<(), HandleError> {
        Err(HandleError::Contract(format!(
            "{} cannot restart writing from {offset}",
            self.title()
        )))
    }

    /// Tries to append the bytes of `other` to `self`.
    ///
    /// On success `other` is left empty and the caller must drop it. The
    /// default refuses every fusion.
    fn merge(&mut self, _other: &mut dyn Handle) -> bool {
        false
    }

    /// Coalesces internal structure without changing the bytes produced.
    fn compress(&mut self, _sorted: bool) -> Result<bool, HandleError> {
        Ok(false)
    }

    fn is_empty(&self) -> bool {
        false
    }

    /// Can this handle be relocated to a remote transfer agent?
    fn moveable(&self) -> bool {
        false
    }

    /// May this handle be driven by the buffered transfer engine?
    fn double_buffer_ok(&self) -> bool {
        true
    }

    /// Describes this handle so a remote agent can rebuild it.
    fn to_remote(&self) -> Result<HandleDescriptor, HandleError> {
        Err(HandleError::not_supported("to_remote", self.title()))
    }

    /// Describes this handle for reconstruction in this process.
    fn to_local(&self) -> Result<HandleDescriptor, HandleError> {
        self.to_remote()
    }

    /// Adds relocation cost hints for this handle.
    fn cost(&self, _costs: &mut CostMap, _reading: bool) -> Result<(), HandleError> {
        Ok(())
    }

    /// Downcast hook used by `merge` implementations.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl fmt::Display for dyn Handle + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title())
    }
}

/// Name of the node this process runs on, used as a cost key.
pub fn local_node() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".into())
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
pub fn read_fully(handle: &mut dyn Handle, buf: &mut [u8]) -> Result<usize, HandleError> {
    let mut total = 0;
    while total < buf.len() {
        let n = handle.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Writes the whole of `buf`, looping over short writes.
pub fn write_all(handle: &mut dyn Handle, buf: &[u8]) -> Result<(), HandleError> {
    let mut done = 0;
    while done < buf.len() {
        let n = handle.write(&buf[done..])?;
        if n == 0 {
            return Err(HandleError::Write(format!(
                "{} accepted 0 of {} bytes",
                handle.title(),
                buf.len() - done
            )));
        }
        done += n;
    }
    Ok(())
}

/// Closes `handle` once `result` is known.
///
/// A close failure is returned when `result` succeeded. When `result` is
/// already an error the close failure is logged and dropped so the original
/// cause reaches the caller.
pub fn close_after<T, E>(handle: &mut dyn Handle, result: Result<T, E>) -> Result<T, E>
where
    E: From<HandleError>,
{
    let closed = handle.close();
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err.into()),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(
                handle = %handle.title(),
                error = %close_err,
                "close failed while another error is in progress, ignored"
            );
            Err(err)
        }
    }
}

/// Opens `handle` for reading, runs `f` with the estimate, then closes it.
pub fn with_read<T, E, F>(handle: &mut dyn Handle, f: F) -> Result<T, E>
where
    E: From<HandleError>,
    F: FnOnce(&mut dyn Handle, u64) -> Result<T, E>,
{
    let estimate = handle.open_for_read()?;
    let result = f(&mut *handle, estimate);
    close_after(handle, result)
}
