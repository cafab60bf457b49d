//! Read-only spans over one fused handle.
//!
//! When [`CompositeHandle::compress`](crate::CompositeHandle::compress) fuses
//! parts that are not adjacent, every original position keeps a
//! [`PartHandle`] that views its own span of the fused handle. All parts of a
//! chain share one [`PartChain`] arena; the arena owns the fused handle, so it
//! is opened at most once per pass and closed exactly once.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytemover_handle::{CostMap, Handle, HandleDescriptor, HandleError, HandleKind, ensure_contract};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct Span {
    start: u64,
    size: u64,
}

#[derive(Debug)]
struct ChainInner {
    fused: Box<dyn Handle>,
    spans: Vec<Span>,
    opened: bool,
}

impl Drop for ChainInner {
    fn drop(&mut self) {
        if self.opened {
            if let Err(err) = self.fused.close() {
                warn!(handle = %self.fused.title(), error = %err, "closing dropped part chain failed");
            }
        }
    }
}

/// Arena shared by every part of one chain.
#[derive(Debug, Clone)]
pub struct PartChain {
    inner: Arc<Mutex<ChainInner>>,
}

impl PartChain {
    /// Takes ownership of the fused handle. The chain starts with no spans.
    pub fn new(fused: Box<dyn Handle>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChainInner {
                fused,
                spans: Vec::new(),
                opened: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a span of `size` bytes after the last one.
    pub fn push(&self, size: u64) -> PartHandle {
        let mut inner = self.lock();
        let start = inner.spans.last().map_or(0, |s| s.start + s.size);
        inner.spans.push(Span { start, size });
        let index = inner.spans.len() - 1;
        drop(inner);
        PartHandle {
            chain: self.clone(),
            index,
            position: 0,
        }
    }

    /// Fuses `other` into the shared handle and returns the part viewing it.
    pub fn absorb(&self, other: &mut dyn Handle) -> Option<PartHandle> {
        let size = other.estimate();
        let merged = self.lock().fused.merge(other);
        merged.then(|| self.push(size))
    }

    /// Number of parts in the chain.
    pub fn len(&self) -> usize {
        self.lock().spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fused_title(&self) -> String {
        self.lock().fused.title()
    }
}

/// One span of a [`PartChain`].
#[derive(Debug)]
pub struct PartHandle {
    chain: PartChain,
    index: usize,
    position: u64,
}

impl PartHandle {
    fn span(&self) -> Span {
        self.chain.lock().spans[self.index]
    }

    /// Offset of this span within the fused handle.
    pub fn span_start(&self) -> u64 {
        self.span().start
    }

    pub fn span_len(&self) -> u64 {
        self.span().size
    }

    pub fn is_head(&self) -> bool {
        self.index == 0
    }

    pub fn is_tail(&self) -> bool {
        self.index + 1 == self.chain.len()
    }

    pub fn chain(&self) -> &PartChain {
        &self.chain
    }

    fn read_only(&self, op: &str) -> HandleError {
        HandleError::Contract(format!("{op} called on read-only part {}", self.title()))
    }

    /// Opens the fused handle if no other part did.
    fn ensure_open(inner: &mut ChainInner) -> Result<(), HandleError> {
        if !inner.opened {
            inner.fused.open_for_read()?;
            inner.opened = true;
        }
        Ok(())
    }
}

impl Handle for PartHandle {
    fn kind(&self) -> HandleKind {
        HandleKind::Part
    }

    fn title(&self) -> String {
        let span = self.span();
        format!(
            "PartHandle[{},offset={},length={}]",
            self.chain.fused_title(),
            span.start,
            span.size
        )
    }

    fn open_for_read(&mut self) -> Result<u64, HandleError> {
        let mut inner = self.chain.lock();
        Self::ensure_open(&mut inner)?;
        let span = inner.spans[self.index];
        inner.fused.seek(span.start)?;
        debug!(index = self.index, start = span.start, size = span.size, "part opened");
        self.position = 0;
        Ok(span.size)
    }

    fn open_for_write(&mut self, _estimate: u64) -> Result<(), HandleError> {
        Err(self.read_only("open_for_write"))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HandleError> {
        let mut inner = self.chain.lock();
        ensure_contract!(inner.opened, "part {} read before open", self.index);
        let span = inner.spans[self.index];
        let left = span.size - self.position;
        let want = left.min(buf.len() as u64) as usize;
        if want == 0 {
            return Ok(0);
        }
        inner.fused.seek(span.start + self.position)?;
        let n = inner.fused.read(&mut buf[..want])?;
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, HandleError> {
        Err(self.read_only("write"))
    }

    fn close(&mut self) -> Result<(), HandleError> {
        let mut inner = self.chain.lock();
        if self.index + 1 == inner.spans.len() && inner.opened {
            inner.opened = false;
            debug!(handle = %inner.fused.title(), "part chain closed");
            inner.fused.close()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), HandleError> {
        Err(self.read_only("flush"))
    }

    fn size(&mut self) -> Result<u64, HandleError> {
        Ok(self.span().size)
    }

    fn estimate(&self) -> u64 {
        self.span().size
    }

    fn position(&mut self) -> Result<u64, HandleError> {
        Ok(self.position)
    }

    fn seek(&mut self, offset: u64) -> Result<u64, HandleError> {
        let size = self.span().size;
        ensure_contract!(offset <= size, "seek to {offset} beyond part of {size} bytes");
        self.position = offset;
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
        let mut inner = self.chain.lock();
        let span = inner.spans[self.index];
        ensure_contract!(
            offset < span.size || (offset == 0 && span.size == 0),
            "cannot restart part of {} bytes from {offset}",
            span.size
        );
        Self::ensure_open(&mut inner)?;
        warn!(index = self.index, offset, "restart read of part");
        self.position = offset;
        Ok(())
    }

    fn to_remote(&self) -> Result<HandleDescriptor, HandleError> {
        Err(self.read_only("to_remote"))
    }

    fn to_local(&self) -> Result<HandleDescriptor, HandleError> {
        Err(self.read_only("to_local"))
    }

    fn cost(&self, _costs: &mut CostMap, _reading: bool) -> Result<(), HandleError> {
        Err(self.read_only("cost"))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
