//! Concatenation of handles into one logical stream.

use std::any::Any;

use bytemover_handle::{CostMap, Handle, HandleDescriptor, HandleError, HandleKind, ensure_contract};
use tracing::{debug, warn};

use crate::part::PartChain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Read,
    Write,
}

/// Several handles read or written back to back.
///
/// Appending tries to fuse the newcomer into the composite, then into the last
/// part, and only then pushes it as a new part. Parts are opened lazily one at
/// a time; a part is closed as soon as it is exhausted.
#[derive(Debug)]
pub struct CompositeHandle {
    parts: Vec<Box<dyn Handle>>,
    lengths: Vec<u64>,
    current: usize,
    written: u64,
    mode: Mode,
    /// Error hit after part of a read was already served; raised by the next read.
    deferred: Option<HandleError>,
}

impl Default for CompositeHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeHandle {
    pub fn new() -> Self {
        Self {
            parts: Vec::new(),
            lengths: Vec::new(),
            current: 0,
            written: 0,
            mode: Mode::Idle,
            deferred: None,
        }
    }

    /// Takes `parts` as they are, without trying to merge them.
    pub fn from_parts(parts: Vec<Box<dyn Handle>>) -> Self {
        Self {
            parts,
            ..Self::new()
        }
    }

    /// Adds `handle` at the end, fusing it with what is already there if possible.
    pub fn append(&mut self, mut handle: Box<dyn Handle>) {
        if self.merge(handle.as_mut()) {
            return;
        }
        if let Some(last) = self.parts.last_mut() {
            if last.merge(handle.as_mut()) {
                return;
            }
        }
        self.parts.push(handle);
    }

    /// Declares the number of bytes the next part will receive when writing.
    pub fn declare_length(&mut self, length: u64) {
        self.lengths.push(length);
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn parts(&self) -> &[Box<dyn Handle>] {
        &self.parts
    }

    pub fn part_titles(&self) -> Vec<String> {
        self.parts.iter().map(|p| p.title()).collect()
    }

    fn open_current(&mut self) -> Result<(), HandleError> {
        let Some(part) = self.parts.get_mut(self.current) else {
            return Ok(());
        };
        match self.mode {
            Mode::Read => {
                let estimate = part.open_for_read()?;
                debug!(index = self.current, part = %part.title(), estimate, "part opened for read");
            }
            Mode::Write => {
                let length = self.lengths[self.current];
                part.open_for_write(length)?;
                debug!(index = self.current, part = %part.title(), length, "part opened for write");
            }
            Mode::Idle => {}
        }
        Ok(())
    }

    fn close_current(&mut self) -> Result<(), HandleError> {
        if let Some(part) = self.parts.get_mut(self.current) {
            part.close()?;
        }
        Ok(())
    }

    /// Closes the current part and opens the next one.
    fn advance(&mut self) -> Result<(), HandleError> {
        self.close_current()?;
        self.current += 1;
        self.written = 0;
        self.open_current()
    }

    /// Skips write parts that were declared with zero bytes.
    fn skip_filled(&mut self) -> Result<(), HandleError> {
        while self.current < self.parts.len() && self.lengths[self.current] == self.written {
            self.advance()?;
        }
        Ok(())
    }

    fn read1(&mut self, buf: &mut [u8]) -> Result<usize, HandleError> {
        while self.current < self.parts.len() {
            let n = self.parts[self.current].read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            self.advance()?;
        }
        Ok(0)
    }

    /// Closes whatever is open and moves the cursor to part `index`.
    fn reposition(&mut self, index: usize) -> Result<(), HandleError> {
        self.close_current()?;
        self.current = index;
        self.open_current()
    }
}

impl Handle for CompositeHandle {
    fn kind(&self) -> HandleKind {
        HandleKind::Composite
    }

    fn title(&self) -> String {
        match self.parts.first() {
            Some(first) => format!("[{},...{{{}}}]", first.title(), self.parts.len()),
            None => "[]".into(),
        }
    }

    fn open_for_read(&mut self) -> Result<u64, HandleError> {
        self.mode = Mode::Read;
        self.deferred = None;
        self.current = 0;
        self.open_current()?;
        Ok(self.estimate())
    }

    fn open_for_write(&mut self, estimate: u64) -> Result<(), HandleError> {
        ensure_contract!(
            self.lengths.len() == self.parts.len(),
            "{} parts but {} declared lengths",
            self.parts.len(),
            self.lengths.len()
        );
        let total: u64 = self.lengths.iter().sum();
        ensure_contract!(
            total == estimate,
            "declared lengths add up to {total}, expected {estimate}"
        );
        if self.parts.is_empty() {
            warn!("composite opened for write without parts");
        }
        self.mode = Mode::Write;
        self.current = 0;
        self.written = 0;
        self.open_current()?;
        self.skip_filled()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HandleError> {
        ensure_contract!(self.mode == Mode::Read, "{} is not open for reading", self.title());
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        let mut total = 0;
        while total < buf.len() {
            let n = match self.read1(&mut buf[total..]) {
                Ok(n) => n,
                Err(err) if total > 0 => {
                    debug!(handle = %self.title(), served = total, error = %err, "read error deferred");
                    self.deferred = Some(err);
                    break;
                }
                Err(err) => return Err(err),
            };
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, HandleError> {
        ensure_contract!(self.mode == Mode::Write, "{} is not open for writing", self.title());
        let mut done = 0;
        while done < buf.len() {
            ensure_contract!(
                self.current < self.parts.len(),
                "write of {} bytes past the declared length of {}",
                buf.len() - done,
                self.title()
            );
            let room = self.lengths[self.current] - self.written;
            let want = room.min((buf.len() - done) as u64) as usize;
            let n = self.parts[self.current].write(&buf[done..done + want])?;
            if n == 0 {
                break;
            }
            done += n;
            self.written += n as u64;
            self.skip_filled()?;
            if n < want {
                break;
            }
        }
        Ok(done)
    }

    fn close(&mut self) -> Result<(), HandleError> {
        let mode = std::mem::replace(&mut self.mode, Mode::Idle);
        self.deferred = None;
        if mode == Mode::Idle || self.current >= self.parts.len() {
            return Ok(());
        }
        self.close_current()?;
        let at = self.current;
        self.current = self.parts.len();
        if mode == Mode::Write {
            return Err(HandleError::Contract(format!(
                "composite closed while part {at} still expected {} bytes",
                self.lengths[at] - self.written
            )));
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), HandleError> {
        match self.parts.get_mut(self.current) {
            Some(part) if self.mode == Mode::Write => part.flush(),
            _ => Ok(()),
        }
    }

    fn size(&mut self) -> Result<u64, HandleError> {
        let mut total = 0;
        for part in &mut self.parts {
            total += part.size()?;
        }
        Ok(total)
    }

    fn estimate(&self) -> u64 {
        self.parts.iter().map(|p| p.estimate()).sum()
    }

    fn position(&mut self) -> Result<u64, HandleError> {
        ensure_contract!(self.mode == Mode::Read, "position of {} outside read", self.title());
        let upto = self.current.min(self.parts.len());
        let mut before = 0;
        for part in &mut self.parts[..upto] {
            before += part.size()?;
        }
        match self.parts.get_mut(self.current) {
            Some(part) => Ok(before + part.position()?),
            None => Ok(before),
        }
    }

    fn seek(&mut self, offset: u64) -> Result<u64, HandleError> {
        ensure_contract!(self.mode == Mode::Read, "seek of {} outside read", self.title());
        self.deferred = None;
        let mut start = 0;
        for i in 0..self.parts.len() {
            let size = self.parts[i].size()?;
            if offset < start + size {
                self.reposition(i)?;
                self.parts[i].seek(offset - start)?;
                return Ok(offset);
            }
            start += size;
        }
        ensure_contract!(
            offset == start,
            "seek to {offset} beyond end ({start}) of {}",
            self.title()
        );
        self.reposition(self.parts.len())?;
        Ok(offset)
    }

    fn can_seek(&self) -> bool {
        self.parts.iter().all(|p| p.can_seek())
    }

    fn rewind(&mut self) -> Result<(), HandleError> {
        ensure_contract!(self.mode == Mode::Read, "rewind of {} outside read", self.title());
        self.deferred = None;
        self.reposition(0)
    }

    fn restart_read_from(&mut self, offset: u64) -> Result<(), HandleError> {
        warn!(handle = %self.title(), offset, "restart read");
        if self.mode != Mode::Idle {
            self.close_current()?;
        }
        self.mode = Mode::Read;
        self.deferred = None;
        let mut start = 0;
        for i in 0..self.parts.len() {
            let estimate = self.parts[i].estimate();
            if offset >= start && offset < start + estimate {
                self.current = i;
                self.open_current()?;
                return self.parts[i].restart_read_from(offset - start);
            }
            start += estimate;
        }
        ensure_contract!(
            offset == start,
            "cannot restart {} from {offset}, estimate is {start}",
            self.title()
        );
        self.current = self.parts.len();
        Ok(())
    }

    fn merge(&mut self, other: &mut dyn Handle) -> bool {
        if !self.kind().may_merge(other.kind()) {
            return false;
        }
        let Some(other) = other.as_any_mut().downcast_mut::<CompositeHandle>() else {
            return false;
        };
        for part in std::mem::take(&mut other.parts) {
            self.append(part);
        }
        true
    }

    fn compress(&mut self, sorted: bool) -> Result<bool, HandleError> {
        ensure_contract!(!sorted, "sorted compression of {} is not supported", self.title());
        ensure_contract!(self.mode == Mode::Idle, "{} compressed while open", self.title());
        ensure_contract!(
            self.lengths.is_empty(),
            "{} has declared write lengths and cannot be compressed",
            self.title()
        );

        let mut changed = false;
        for i in 0..self.parts.len() {
            if self.parts[i].kind() == HandleKind::Part {
                continue;
            }
            let mut chain: Option<PartChain> = None;
            for j in (i + 1)..self.parts.len() {
                if self.parts[j].kind() == HandleKind::Part {
                    continue;
                }
                if let Some(existing) = chain.as_ref() {
                    if let Some(part) = existing.absorb(self.parts[j].as_mut()) {
                        debug!(first = i, next = j, "part joined chain");
                        self.parts[j] = Box::new(part);
                        changed = true;
                    }
                    continue;
                }
                let (head, tail) = self.parts.split_at_mut(j);
                let size_i = head[i].estimate();
                let size_j = tail[0].estimate();
                if !head[i].merge(tail[0].as_mut()) {
                    continue;
                }
                let fused = std::mem::replace(&mut self.parts[i], Box::new(Self::new()));
                debug!(first = i, second = j, fused = %fused.title(), "parts fused");
                let created = PartChain::new(fused);
                self.parts[i] = Box::new(created.push(size_i));
                self.parts[j] = Box::new(created.push(size_j));
                chain = Some(created);
                changed = true;
            }
        }
        Ok(changed)
    }

    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn moveable(&self) -> bool {
        !self.parts.is_empty() && self.parts.iter().all(|p| p.moveable())
    }

    fn double_buffer_ok(&self) -> bool {
        self.parts.iter().all(|p| p.double_buffer_ok())
    }

    fn to_remote(&self) -> Result<HandleDescriptor, HandleError> {
        Ok(HandleDescriptor::Composite {
            parts: self
                .parts
                .iter()
                .map(|p| p.to_remote())
                .collect::<Result<_, _>>()?,
            lengths: self.lengths.clone(),
        })
    }

    fn to_local(&self) -> Result<HandleDescriptor, HandleError> {
        Ok(HandleDescriptor::Composite {
            parts: self
                .parts
                .iter()
                .map(|p| p.to_local())
                .collect::<Result<_, _>>()?,
            lengths: self.lengths.clone(),
        })
    }

    fn cost(&self, costs: &mut CostMap, reading: bool) -> Result<(), HandleError> {
        for part in &self.parts {
            part.cost(costs, reading)?;
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
