//! Whole-file backend.

use std::any::Any;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::descriptor::HandleDescriptor;
use crate::handle::{CostMap, local_node};
use crate::{Handle, HandleError, HandleKind};

/// A local file, read or written from the start.
#[derive(Debug)]
pub struct FileHandle {
    path: PathBuf,
    file: Option<File>,
    reading: bool,
}

impl FileHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            reading: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File, HandleError> {
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(HandleError::Contract(format!(
                "{} is not open",
                self.path.display()
            ))),
        }
    }
}

/// Last path component, used in titles.
pub(crate) fn short_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl Handle for FileHandle {
    fn kind(&self) -> HandleKind {
        HandleKind::File
    }

    fn title(&self) -> String {
        short_name(&self.path)
    }

    fn open_for_read(&mut self) -> Result<u64, HandleError> {
        let file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        debug!(path = %self.path.display(), len, "file opened for reading");
        self.file = Some(file);
        self.reading = true;
        Ok(len)
    }

    fn open_for_write(&mut self, estimate: u64) -> Result<(), HandleError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        debug!(path = %self.path.display(), estimate, "file opened for writing");
        self.file = Some(file);
        self.reading = false;
        Ok(())
    }

    fn open_for_append(&mut self, _estimate: u64) -> Result<(), HandleError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.file = Some(file);
        self.reading = false;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HandleError> {
        Ok(self.file()?.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, HandleError> {
        Ok(self.file()?.write(buf)?)
    }

    fn close(&mut self) -> Result<(), HandleError> {
        match self.file.take() {
            Some(mut file) => {
                if !self.reading {
                    file.flush()?;
                }
                Ok(())
            }
            None => {
                warn!(path = %self.path.display(), "closing file handle that is not open");
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> Result<(), HandleError> {
        let file = self.file()?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn size(&mut self) -> Result<u64, HandleError> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn estimate(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    fn position(&mut self) -> Result<u64, HandleError> {
        Ok(self.file()?.stream_position()?)
    }

    fn seek(&mut self, offset: u64) -> Result<u64, HandleError> {
        Ok(self.file()?.seek(SeekFrom::Start(offset))?)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> Result<(), HandleError> {
        self.seek(0).map(|_| ())
    }

    fn restart_read_from(&mut self, offset: u64) -> Result<(), HandleError> {
        warn!(path = %self.path.display(), offset, "restart read");
        if self.file.is_none() {
            self.open_for_read()?;
        }
        self.seek(offset).map(|_| ())
    }

    fn restart_write_from(&mut self, offset: u64) -> Result<(), HandleError> {
        warn!(path = %self.path.display(), offset, "restart write");
        let file = self.file()?;
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn to_remote(&self) -> Result<HandleDescriptor, HandleError> {
        Ok(HandleDescriptor::File {
            path: self.path.clone(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");

        let mut w = FileHandle::new(&path);
        w.open_for_write(11).unwrap();
        w.write(b"hello world").unwrap();
        w.close().unwrap();

        let mut r = FileHandle::new(&path);
        assert_eq!(r.open_for_read().unwrap(), 11);
        assert_eq!(r.estimate(), 11);
        let mut buf = vec![0u8; 32];
        let n = crate::read_fully(&mut r, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");
        r.close().unwrap();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let mut r = FileHandle::new(dir.path().join("absent"));
        assert!(matches!(r.open_for_read(), Err(HandleError::Io(_))));
        assert_eq!(r.estimate(), 0);
    }

    #[test]
    fn read_before_open_is_a_contract_violation() {
        let mut r = FileHandle::new("/nonexistent/x");
        let mut buf = [0u8; 4];
        assert!(matches!(r.read(&mut buf), Err(HandleError::Contract(_))));
    }

    #[test]
    fn restart_write_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let mut w = FileHandle::new(&path);
        w.open_for_write(0).unwrap();
        w.write(b"0123456789").unwrap();
        w.restart_write_from(4).unwrap();
        w.write(b"AB").unwrap();
        w.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"0123AB");
    }

    #[test]
    fn read_cost_is_charged_to_this_node() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.bin");
        std::fs::write(&path, vec![0u8; 100]).unwrap();
        let h = FileHandle::new(&path);
        let mut costs = CostMap::new();
        h.cost(&mut costs, true).unwrap();
        h.cost(&mut costs, false).unwrap();
        assert_eq!(costs.get(&local_node()), Some(&100));
    }
}
