//! In-memory backend.

use std::any::Any;

use crate::descriptor::HandleDescriptor;
use crate::{Handle, HandleError, HandleKind, ensure_contract};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Closed,
    Read,
    Write,
}

/// Growable byte buffer exposed as a handle.
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    data: Vec<u8>,
    position: usize,
    mode: Mode,
}

impl Default for MemoryHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHandle {
    /// Empty buffer, typically used as a write target.
    pub fn new() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Buffer pre-filled with `data`.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            mode: Mode::Closed,
        }
    }

    /// Bytes currently held.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn check_offset(&self, offset: u64) -> Result<usize, HandleError> {
        ensure_contract!(
            offset <= self.data.len() as u64,
            "offset {offset} beyond end of {}",
            self.title()
        );
        Ok(offset as usize)
    }
}

impl Handle for MemoryHandle {
    fn kind(&self) -> HandleKind {
        HandleKind::Memory
    }

    fn title(&self) -> String {
        format!("MemoryHandle[{}]", self.data.len())
    }

    fn open_for_read(&mut self) -> Result<u64, HandleError> {
        self.mode = Mode::Read;
        self.position = 0;
        Ok(self.data.len() as u64)
    }

    fn open_for_write(&mut self, estimate: u64) -> Result<(), HandleError> {
        self.mode = Mode::Write;
        self.position = 0;
        self.data.clear();
        self.data.reserve(estimate as usize);
        Ok(())
    }

    fn open_for_append(&mut self, _estimate: u64) -> Result<(), HandleError> {
        self.mode = Mode::Write;
        self.position = self.data.len();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HandleError> {
        ensure_contract!(self.mode == Mode::Read, "{} is not open for reading", self.title());
        let left = self.data.len() - self.position;
        let n = left.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, HandleError> {
        ensure_contract!(self.mode == Mode::Write, "{} is not open for writing", self.title());
        let end = self.position + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(buf);
        self.position = end;
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<(), HandleError> {
        self.mode = Mode::Closed;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), HandleError> {
        Ok(())
    }

    fn size(&mut self) -> Result<u64, HandleError> {
        Ok(self.data.len() as u64)
    }

    fn estimate(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&mut self) -> Result<u64, HandleError> {
        Ok(self.position as u64)
    }

    fn seek(&mut self, offset: u64) -> Result<u64, HandleError> {
        self.position = self.check_offset(offset)?;
        Ok(offset)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> Result<(), HandleError> {
        self.position = 0;
        Ok(())
    }

    fn restart_read_from(&mut self, offset: u64) -> Result<(), HandleError> {
        self.position = self.check_offset(offset)?;
        self.mode = Mode::Read;
        Ok(())
    }

    fn restart_write_from(&mut self, offset: u64) -> Result<(), HandleError> {
        let offset = self.check_offset(offset)?;
        self.data.truncate(offset);
        self.position = offset;
        self.mode = Mode::Write;
        Ok(())
    }

    fn to_remote(&self) -> Result<HandleDescriptor, HandleError> {
        Ok(HandleDescriptor::Memory {
            data: self.data.clone(),
        })
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
