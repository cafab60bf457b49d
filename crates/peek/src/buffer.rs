use std::any::Any;
use std::collections::VecDeque;

use bytemover_handle::{CostMap, Handle, HandleError, HandleKind};
use tracing::debug;

/// Read-ahead chunk used when topping up for a multi-byte peek.
const TOP_UP: usize = 4096;

/// Handle decorator that can look at upcoming bytes without consuming them.
///
/// Peeked bytes sit in `pending` and are handed out by the next `read`s in
/// order, so nothing is skipped or duplicated.
#[derive(Debug)]
pub struct PeekBuffer {
    inner: Box<dyn Handle>,
    pending: VecDeque<u8>,
}

impl PeekBuffer {
    pub fn new(inner: Box<dyn Handle>) -> Self {
        Self {
            inner,
            pending: VecDeque::new(),
        }
    }

    /// Returns byte `n` of the unread stream.
    ///
    /// Fails with a read error if the stream ends before that byte.
    pub fn peek_byte(&mut self, n: usize) -> Result<u8, HandleError> {
        let mut one = [0u8; 1];
        while self.pending.len() <= n {
            if self.inner.read(&mut one)? == 0 {
                return Err(HandleError::Read(format!(
                    "{} ended after {} bytes, cannot peek byte {n}",
                    self.inner.title(),
                    self.pending.len()
                )));
            }
            self.pending.push_back(one[0]);
        }
        Ok(self.pending[n])
    }

    /// Copies upcoming bytes starting `offset` bytes ahead into `buf`.
    ///
    /// Returns fewer than `buf.len()` bytes only at end of stream.
    pub fn peek(&mut self, buf: &mut [u8], offset: usize) -> Result<usize, HandleError> {
        let available = self.top_up(offset + buf.len())?;
        let n = available.saturating_sub(offset).min(buf.len());
        if n == 0 {
            return Ok(0);
        }
        for (dst, src) in buf.iter_mut().zip(self.pending.range(offset..offset + n)) {
            *dst = *src;
        }
        Ok(n)
    }

    /// Number of bytes peeked but not yet read.
    pub fn peeked(&self) -> usize {
        self.pending.len()
    }

    /// Drops the next `n` bytes of the stream.
    pub fn consume(&mut self, n: usize) -> Result<(), HandleError> {
        let available = self.top_up(n)?;
        if available < n {
            return Err(HandleError::Read(format!(
                "{} ended after {available} bytes, cannot consume {n}",
                self.inner.title()
            )));
        }
        self.pending.drain(..n);
        Ok(())
    }

    /// Gives back the wrapped handle. Pending bytes are lost.
    pub fn into_inner(self) -> Box<dyn Handle> {
        self.inner
    }

    /// Reads until `want` bytes are pending or the stream ends.
    pub(crate) fn top_up(&mut self, want: usize) -> Result<usize, HandleError> {
        let mut chunk = [0u8; TOP_UP];
        while self.pending.len() < want {
            let ask = (want - self.pending.len()).min(TOP_UP);
            let n = self.inner.read(&mut chunk[..ask])?;
            if n == 0 {
                debug!(handle = %self.inner.title(), pending = self.pending.len(), want, "peek hit end of stream");
                break;
            }
            self.pending.extend(&chunk[..n]);
        }
        Ok(self.pending.len())
    }
}

impl Handle for PeekBuffer {
    fn kind(&self) -> HandleKind {
        HandleKind::Peek
    }

    fn title(&self) -> String {
        format!("PeekBuffer[{}]", self.inner.title())
    }

    fn open_for_read(&mut self) -> Result<u64, HandleError> {
        self.pending.clear();
        self.inner.open_for_read()
    }

    fn open_for_write(&mut self, _estimate: u64) -> Result<(), HandleError> {
        Err(HandleError::not_supported("open_for_write", self.title()))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HandleError> {
        let from_pending = self.pending.len().min(buf.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..from_pending)) {
            *dst = src;
        }
        if from_pending == buf.len() {
            return Ok(from_pending);
        }
        let n = self.inner.read(&mut buf[from_pending..])?;
        Ok(from_pending + n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, HandleError> {
        Err(HandleError::not_supported("write", self.title()))
    }

    fn close(&mut self) -> Result<(), HandleError> {
        self.pending.clear();
        self.inner.close()
    }

    fn size(&mut self) -> Result<u64, HandleError> {
        self.inner.size()
    }

    fn estimate(&self) -> u64 {
        self.inner.estimate()
    }

    fn position(&mut self) -> Result<u64, HandleError> {
        Ok(self.inner.position()? - self.pending.len() as u64)
    }

    fn seek(&mut self, offset: u64) -> Result<u64, HandleError> {
        self.pending.clear();
        self.inner.seek(offset)
    }

    fn can_seek(&self) -> bool {
        self.inner.can_seek()
    }

    fn rewind(&mut self) -> Result<(), HandleError> {
        self.pending.clear();
        self.inner.rewind()
    }

    fn restart_read_from(&mut self, offset: u64) -> Result<(), HandleError> {
        self.pending.clear();
        self.inner.restart_read_from(offset)
    }

    fn double_buffer_ok(&self) -> bool {
        self.inner.double_buffer_ok()
    }

    fn cost(&self, costs: &mut CostMap, reading: bool) -> Result<(), HandleError> {
        self.inner.cost(costs, reading)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
