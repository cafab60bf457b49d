//! Content detection from magic numbers.

use std::fmt;

use bytemover_handle::HandleError;

use crate::PeekBuffer;

/// Bytes examined by [`detect`]; enough for a tar header.
pub const SNIFF_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    Zip,
    Tar,
    Grib,
    Bufr,
    NetCdf,
    Hdf5,
}

impl ContentKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::Grib => "grib",
            Self::Bufr => "bufr",
            Self::NetCdf => "netcdf",
            Self::Hdf5 => "hdf5",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies `data` from its leading bytes.
pub fn detect_bytes(data: &[u8]) -> Option<ContentKind> {
    match data {
        [0x1F, 0x8B, ..] => Some(ContentKind::Gzip),
        [b'B', b'Z', b'h', ..] => Some(ContentKind::Bzip2),
        [0xFD, b'7', b'z', b'X', b'Z', 0x00, ..] => Some(ContentKind::Xz),
        [0x28, 0xB5, 0x2F, 0xFD, ..] => Some(ContentKind::Zstd),
        [b'P', b'K', 0x03, 0x04, ..] => Some(ContentKind::Zip),
        [b'G', b'R', b'I', b'B', ..] => Some(ContentKind::Grib),
        [b'B', b'U', b'F', b'R', ..] => Some(ContentKind::Bufr),
        [b'C', b'D', b'F', 0x01 | 0x02 | 0x05, ..] => Some(ContentKind::NetCdf),
        [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n', ..] => Some(ContentKind::Hdf5),
        _ if is_tar_header(data) => Some(ContentKind::Tar),
        _ => None,
    }
}

fn is_tar_header(data: &[u8]) -> bool {
    data.len() >= 262 && data[257..262] == *b"ustar"
}

/// Peeks at the head of `buffer` and identifies it. Nothing is consumed.
pub fn detect(buffer: &mut PeekBuffer) -> Result<Option<ContentKind>, HandleError> {
    let mut head = [0u8; SNIFF_LEN];
    let n = buffer.peek(&mut head, 0)?;
    Ok(detect_bytes(&head[..n]))
}
