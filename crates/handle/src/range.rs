//! Read-only view over a list of byte ranges of one local file.
//!
//! Two range handles on the same path merge by concatenating their range
//! lists; touching ranges are then coalesced so long runs of contiguous
//! fragments collapse into a single read.

use std::any::Any;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::descriptor::{ByteRange, HandleDescriptor};
use crate::file::short_name;
use crate::handle::{CostMap, local_node};
use crate::{Handle, HandleError, HandleKind};

/// Ordered byte ranges of a file, read as one stream.
#[derive(Debug)]
pub struct FileRangeHandle {
    path: PathBuf,
    ranges: Vec<ByteRange>,
    file: Option<File>,
    index: usize,
    pos: u64,
}

/// Merges touching neighbours in place. Returns `true` if anything changed.
fn coalesce(ranges: &mut Vec<ByteRange>) -> bool {
    let before = ranges.len();
    let mut out: Vec<ByteRange> = Vec::with_capacity(before);
    for r in ranges.drain(..) {
        match out.last_mut() {
            Some(last) if last.end() == r.offset => last.length += r.length,
            _ => out.push(r),
        }
    }
    *ranges = out;
    ranges.len() != before
}

impl FileRangeHandle {
    /// A single range.
    pub fn new(path: impl Into<PathBuf>, offset: u64, length: u64) -> Self {
        Self::with_ranges(path, vec![ByteRange::new(offset, length)])
    }

    /// Several ranges, read in the given order.
    pub fn with_ranges(path: impl Into<PathBuf>, mut ranges: Vec<ByteRange>) -> Self {
        coalesce(&mut ranges);
        Self {
            path: path.into(),
            ranges,
            file: None,
            index: 0,
            pos: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    /// Moves the cursor to logical offset `from`. Returns `false` past the end.
    fn locate(&mut self, from: u64) -> bool {
        let mut start = 0;
        for (i, r) in self.ranges.iter().enumerate() {
            if from >= start && from < start + r.length {
                self.index = i;
                self.pos = from - start;
                return true;
            }
            start += r.length;
        }
        false
    }

    fn read1(&mut self, buf: &mut [u8]) -> Result<usize, HandleError> {
        while self.index < self.ranges.len() && self.ranges[self.index].length == 0 {
            self.index += 1;
        }
        if self.index == self.ranges.len() {
            return Ok(0);
        }

        let range = self.ranges[self.index];
        let want = (range.length - self.pos).min(buf.len() as u64) as usize;
        let at = range.offset + self.pos;

        let Some(file) = self.file.as_mut() else {
            return Err(HandleError::Contract(format!(
                "{} is not open",
                self.path.display()
            )));
        };
        file.seek(SeekFrom::Start(at))?;

        let mut got = 0;
        while got < want {
            let n = file.read(&mut buf[got..want])?;
            if n == 0 {
                break;
            }
            got += n;
        }
        if got != want {
            return Err(HandleError::Read(format!(
                "{}: cannot read {want} bytes at {at}, got only {got}",
                self.path.display()
            )));
        }

        self.pos += got as u64;
        if self.pos >= range.length {
            self.index += 1;
            self.pos = 0;
        }
        Ok(got)
    }
}

impl Handle for FileRangeHandle {
    fn kind(&self) -> HandleKind {
        HandleKind::FileRange
    }

    fn title(&self) -> String {
        format!("{} ({})", short_name(&self.path), self.ranges.len())
    }

    fn open_for_read(&mut self) -> Result<u64, HandleError> {
        self.file = Some(File::open(&self.path)?);
        debug!(path = %self.path.display(), ranges = self.ranges.len(), "file ranges opened");
        self.rewind()?;
        Ok(self.estimate())
    }

    fn open_for_write(&mut self, _estimate: u64) -> Result<(), HandleError> {
        Err(HandleError::not_supported("open_for_write", self.title()))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HandleError> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read1(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, HandleError> {
        Err(HandleError::not_supported("write", self.title()))
    }

    fn close(&mut self) -> Result<(), HandleError> {
        if self.file.take().is_none() {
            warn!(path = %self.path.display(), "closing file ranges, file is not opened");
        }
        Ok(())
    }

    fn size(&mut self) -> Result<u64, HandleError> {
        Ok(self.estimate())
    }

    fn estimate(&self) -> u64 {
        self.ranges.iter().map(|r| r.length).sum()
    }

    fn position(&mut self) -> Result<u64, HandleError> {
        let before: u64 = self.ranges[..self.index].iter().map(|r| r.length).sum();
        Ok(before + self.pos)
    }

    fn seek(&mut self, offset: u64) -> Result<u64, HandleError> {
        if self.locate(offset) {
            return Ok(offset);
        }
        let total = self.estimate();
        if offset == total {
            self.index = self.ranges.len();
            self.pos = 0;
            return Ok(offset);
        }
        Err(HandleError::Contract(format!(
            "seek to {offset} beyond end ({total}) of {}",
            self.title()
        )))
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> Result<(), HandleError> {
        self.index = 0;
        self.pos = 0;
        Ok(())
    }

    fn restart_read_from(&mut self, offset: u64) -> Result<(), HandleError> {
        warn!(handle = %self.title(), offset, "restart read");
        self.rewind()?;
        if self.locate(offset) || (offset == 0 && self.estimate() == 0) {
            return Ok(());
        }
        Err(HandleError::Contract(format!(
            "cannot restart {} from {offset}, estimate is {}",
            self.title(),
            self.estimate()
        )))
    }

    fn merge(&mut self, other: &mut dyn Handle) -> bool {
        if !self.kind().may_merge(other.kind()) {
            return false;
        }
        let Some(other) = other.as_any_mut().downcast_mut::<FileRangeHandle>() else {
            return false;
        };
        if other.path != self.path {
            return false;
        }
        self.ranges.append(&mut other.ranges);
        coalesce(&mut self.ranges);
        true
    }

    fn compress(&mut self, sorted: bool) -> Result<bool, HandleError> {
        if sorted {
            self.ranges.sort();
        }
        Ok(coalesce(&mut self.ranges))
    }

    fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    fn to_remote(&self) -> Result<HandleDescriptor, HandleError> {
        Ok(HandleDescriptor::FileRange {
            path: self.path.clone(),
            ranges: self.ranges.clone(),
        })
    }

    fn cost(&self, costs: &mut CostMap, reading: bool) -> Result<(), HandleError> {
        if reading {
            *costs.entry(local_node()).or_default() += self.estimate();
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
