//! Fake handles shared by the engine tests.

use std::any::Any;

use bytemover_handle::{Handle, HandleError, HandleKind, MemoryHandle};

pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 253) as u8).collect()
}

pub(crate) fn mem(data: &[u8]) -> MemoryHandle {
    MemoryHandle::from_bytes(data.to_vec())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// One `Restart` once `at` bytes are in, then healthy.
    RestartOnce,
    /// `Restart` every time `at` is reached.
    RestartAlways,
    /// A plain write error once `at` bytes are in.
    Broken,
}

/// In-memory target that fails once a given number of bytes was written.
#[derive(Debug)]
pub(crate) struct Flaky {
    data: Vec<u8>,
    at: u64,
    fault: Fault,
    tripped: bool,
    pub closes: usize,
    pub restarts: Vec<u64>,
}

impl Flaky {
    fn with(at: u64, fault: Fault) -> Self {
        Self {
            data: Vec::new(),
            at,
            fault,
            tripped: false,
            closes: 0,
            restarts: Vec::new(),
        }
    }

    pub(crate) fn failing_after(at: u64) -> Self {
        Self::with(at, Fault::RestartOnce)
    }

    pub(crate) fn always_failing_after(at: u64) -> Self {
        Self::with(at, Fault::RestartAlways)
    }

    pub(crate) fn broken_after(at: u64) -> Self {
        Self::with(at, Fault::Broken)
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Handle for Flaky {
    fn kind(&self) -> HandleKind {
        HandleKind::Custom
    }

    fn title(&self) -> String {
        "Flaky".into()
    }

    fn open_for_read(&mut self) -> Result<u64, HandleError> {
        Err(HandleError::not_supported("open_for_read", self.title()))
    }

    fn open_for_write(&mut self, _estimate: u64) -> Result<(), HandleError> {
        self.data.clear();
        Ok(())
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, HandleError> {
        Err(HandleError::not_supported("read", self.title()))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, HandleError> {
        let len = self.data.len() as u64;
        let armed = !(self.tripped && self.fault == Fault::RestartOnce);
        if armed && len >= self.at {
            self.tripped = true;
            return match self.fault {
                Fault::Broken => Err(HandleError::Write("device gone".into())),
                _ => Err(HandleError::Restart { offset: len }),
            };
        }
        let room = if armed {
            (self.at - len) as usize
        } else {
            buf.len()
        };
        let n = buf.len().min(room);
        self.data.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn close(&mut self) -> Result<(), HandleError> {
        self.closes += 1;
        Ok(())
    }

    fn restart_write_from(&mut self, offset: u64) -> Result<(), HandleError> {
        if offset > self.data.len() as u64 {
            return Err(HandleError::Contract(format!("hole before {offset}")));
        }
        self.data.truncate(offset as usize);
        self.restarts.push(offset);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Source that raises one `Restart` after `at` bytes and may lie about its length.
#[derive(Debug)]
pub(crate) struct FlakySource {
    data: Vec<u8>,
    pos: usize,
    at: Option<usize>,
    estimate: Option<u64>,
    pub closes: usize,
}

impl FlakySource {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            at: None,
            estimate: None,
            closes: 0,
        }
    }

    pub(crate) fn failing_at(mut self, at: usize) -> Self {
        self.at = Some(at);
        self
    }

    pub(crate) fn announcing(mut self, estimate: u64) -> Self {
        self.estimate = Some(estimate);
        self
    }
}

impl Handle for FlakySource {
    fn kind(&self) -> HandleKind {
        HandleKind::Custom
    }

    fn title(&self) -> String {
        "FlakySource".into()
    }

    fn open_for_read(&mut self) -> Result<u64, HandleError> {
        self.pos = 0;
        Ok(self.estimate.unwrap_or(self.data.len() as u64))
    }

    fn open_for_write(&mut self, _estimate: u64) -> Result<(), HandleError> {
        Err(HandleError::not_supported("open_for_write", self.title()))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HandleError> {
        if let Some(at) = self.at {
            if self.pos >= at {
                self.at = None;
                return Err(HandleError::Restart {
                    offset: self.pos as u64,
                });
            }
        }
        let end = match self.at {
            Some(at) => at.min(self.data.len()),
            None => self.data.len(),
        };
        let n = buf.len().min(end - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, HandleError> {
        Err(HandleError::not_supported("write", self.title()))
    }

    fn close(&mut self) -> Result<(), HandleError> {
        self.closes += 1;
        Ok(())
    }

    fn restart_read_from(&mut self, offset: u64) -> Result<(), HandleError> {
        self.pos = offset as usize;
        Ok(())
    }

    fn estimate(&self) -> u64 {
        self.estimate.unwrap_or(self.data.len() as u64)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
