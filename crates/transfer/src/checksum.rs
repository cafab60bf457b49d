//! SHA-256 digests of streams.

use sha2::{Digest, Sha256};

use bytemover_handle::{Handle, with_read};

use crate::{TransferError, TransferWatcher};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Reads `handle` from start to end and returns its hex-encoded SHA-256.
pub fn checksum_handle(handle: &mut dyn Handle, buffer_size: usize) -> Result<String, TransferError> {
    if buffer_size == 0 {
        return Err(TransferError::Contract("checksum buffer size is 0".into()));
    }
    with_read(handle, |h, _| {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; buffer_size];
        loop {
            let n = h.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
}

/// Hashes the source stream while it is being copied.
///
/// After a restart the engine replays bytes from the resume offset; bytes
/// already hashed are skipped so the digest covers each offset once.
#[derive(Debug, Default, Clone)]
pub struct ChecksumWatcher {
    hasher: Sha256,
    hashed: u64,
    cursor: u64,
}

impl ChecksumWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes covered by the digest so far.
    pub fn hashed(&self) -> u64 {
        self.hashed
    }

    pub fn hex_digest(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// Fails unless the digest equals `expected`.
    pub fn verify(&self, expected: &str) -> Result<(), TransferError> {
        let actual = self.hex_digest();
        if actual != expected {
            return Err(TransferError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }
}

impl TransferWatcher for ChecksumWatcher {
    fn from_opened(&mut self, _estimate: u64) {
        *self = Self::default();
    }

    fn watch(&mut self, data: &[u8]) {
        let end = self.cursor + data.len() as u64;
        if end > self.hashed {
            let skip = self.hashed.saturating_sub(self.cursor) as usize;
            self.hasher.update(&data[skip..]);
            self.hashed = end;
        }
        self.cursor = end;
    }

    fn restart_from(&mut self, offset: u64) {
        self.cursor = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemover_handle::MemoryHandle;

    #[test]
    fn checksum_bytes_deterministic() {
        let a = checksum_bytes(b"hello");
        assert_eq!(a, checksum_bytes(b"hello"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, checksum_bytes(b"world"));
    }

    #[test]
    fn handle_digest_matches_bytes() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut h = MemoryHandle::from_bytes(data.clone());
        assert_eq!(checksum_handle(&mut h, 64).unwrap(), checksum_bytes(&data));
    }

    #[test]
    fn watcher_ignores_replayed_bytes() {
        let mut w = ChecksumWatcher::new();
        w.from_opened(10);
        w.watch(b"abcdef");
        w.restart_from(4);
        w.watch(b"efghij");
        assert_eq!(w.hashed(), 10);
        assert_eq!(w.hex_digest(), checksum_bytes(b"abcdefghij"));
        w.verify(&checksum_bytes(b"abcdefghij")).unwrap();
        assert!(matches!(
            w.verify(&checksum_bytes(b"abc")),
            Err(TransferError::ChecksumMismatch { .. })
        ));
    }
}
