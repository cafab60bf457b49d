use std::any::Any;

use bytemover_handle::{Handle, HandleError, HandleKind, ensure_contract};

use crate::PeekBuffer;

/// Seekable view over the bytes a [`PeekBuffer`] has captured.
///
/// Reads never consume from the buffer. Seeking is allowed anywhere in
/// `[seekable_start, seekable_start + peeked]`; a target past what was peeked
/// tops the buffer up first and fails if the stream is too short.
#[derive(Debug)]
pub struct PeekWindow {
    buffer: PeekBuffer,
    seekable_start: u64,
    position: u64,
}

impl PeekWindow {
    pub fn new(buffer: PeekBuffer) -> Self {
        Self {
            buffer,
            seekable_start: 0,
            position: 0,
        }
    }

    pub fn seekable_start(&self) -> u64 {
        self.seekable_start
    }

    /// Consumes everything peeked so far and moves the window past it.
    pub fn clear(&mut self) -> Result<(), HandleError> {
        let peeked = self.buffer.peeked();
        self.buffer.consume(peeked)?;
        self.seekable_start += peeked as u64;
        self.position = self.seekable_start;
        Ok(())
    }

    pub fn into_inner(self) -> PeekBuffer {
        self.buffer
    }
}

impl Handle for PeekWindow {
    fn kind(&self) -> HandleKind {
        HandleKind::Window
    }

    fn title(&self) -> String {
        format!("PeekWindow[{}]", self.buffer.title())
    }

    fn open_for_read(&mut self) -> Result<u64, HandleError> {
        self.seekable_start = 0;
        self.position = 0;
        self.buffer.open_for_read()
    }

    fn open_for_write(&mut self, _estimate: u64) -> Result<(), HandleError> {
        Err(HandleError::not_supported("open_for_write", self.title()))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HandleError> {
        let offset = (self.position - self.seekable_start) as usize;
        let n = self.buffer.peek(buf, offset)?;
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, HandleError> {
        Err(HandleError::not_supported("write", self.title()))
    }

    fn close(&mut self) -> Result<(), HandleError> {
        self.buffer.close()
    }

    fn estimate(&self) -> u64 {
        self.buffer.estimate()
    }

    fn position(&mut self) -> Result<u64, HandleError> {
        Ok(self.position)
    }

    fn seek(&mut self, offset: u64) -> Result<u64, HandleError> {
        ensure_contract!(
            offset >= self.seekable_start,
            "seek to {offset} before window start {}",
            self.seekable_start
        );
        let ahead = (offset - self.seekable_start) as usize;
        let peeked = self.buffer.top_up(ahead)?;
        ensure_contract!(
            ahead <= peeked,
            "seek to {offset} beyond the {peeked} bytes available from {}",
            self.seekable_start
        );
        self.position = offset;
        Ok(offset)
    }

    fn skip(&mut self, length: u64) -> Result<(), HandleError> {
        self.seek(self.position + length).map(|_| ())
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> Result<(), HandleError> {
        self.position = self.seekable_start;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemover_handle::{MemoryHandle, read_fully};

    fn window(bytes: &[u8]) -> PeekWindow {
        let mut w = PeekWindow::new(PeekBuffer::new(Box::new(MemoryHandle::from_bytes(
            bytes.to_vec(),
        ))));
        w.open_for_read().unwrap();
        w
    }

    #[test]
    fn rereads_without_consuming() {
        let mut w = window(b"GRIB0123");
        let mut head = [0u8; 4];
        assert_eq!(w.read(&mut head).unwrap(), 4);
        assert_eq!(&head, b"GRIB");
        w.seek(0).unwrap();
        let mut again = [0u8; 6];
        assert_eq!(w.read(&mut again).unwrap(), 6);
        assert_eq!(&again, b"GRIB01");

        let mut buffer = w.into_inner();
        let mut all = [0u8; 16];
        let n = read_fully(&mut buffer, &mut all).unwrap();
        assert_eq!(&all[..n], b"GRIB0123");
    }

    #[test]
    fn seek_past_peeked_tops_up_or_fails() {
        let mut w = window(b"abcdef");
        w.seek(4).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(w.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(w.seek(6).unwrap(), 6);
        assert!(matches!(w.seek(7), Err(HandleError::Contract(_))));
        assert_eq!(w.position().unwrap(), 6);
    }

    #[test]
    fn clear_moves_the_window() {
        let mut w = window(b"headerbody");
        let mut head = [0u8; 6];
        w.read(&mut head).unwrap();
        w.clear().unwrap();
        assert_eq!(w.seekable_start(), 6);
        assert_eq!(w.position().unwrap(), 6);
        assert!(matches!(w.seek(2), Err(HandleError::Contract(_))));

        let mut body = [0u8; 4];
        assert_eq!(w.read(&mut body).unwrap(), 4);
        assert_eq!(&body, b"body");
        w.rewind().unwrap();
        w.skip(2).unwrap();
        let mut tail = [0u8; 4];
        assert_eq!(w.read(&mut tail).unwrap(), 2);
        assert_eq!(&tail[..2], b"dy");
    }

    #[test]
    fn window_is_always_seekable() {
        let w = window(b"");
        assert!(w.can_seek());
    }
}
