//! Tagged handle descriptions exchanged across process boundaries.
//!
//! A descriptor names the concrete kind and carries its constructor
//! parameters, so the receiving side can build an equivalent handle.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::file::FileHandle;
use crate::memory::MemoryHandle;
use crate::range::FileRangeHandle;
use crate::{Handle, HandleError};

/// A contiguous range of bytes within some backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// First byte after the range.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Serializable description of a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandleDescriptor {
    Memory {
        data: Vec<u8>,
    },
    File {
        path: PathBuf,
    },
    FileRange {
        path: PathBuf,
        ranges: Vec<ByteRange>,
    },
    Composite {
        parts: Vec<HandleDescriptor>,
        /// Declared per-part lengths (write mode only).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        lengths: Vec<u64>,
    },
}

impl HandleDescriptor {
    /// Name of the described kind, as it appears in the `kind` tag.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Memory { .. } => "memory",
            Self::File { .. } => "file",
            Self::FileRange { .. } => "file_range",
            Self::Composite { .. } => "composite",
        }
    }

    pub fn to_json(&self) -> Result<String, HandleError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, HandleError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Builds the described handle for the leaf kinds.
    ///
    /// Composite descriptors need the composite implementation and are
    /// rebuilt by `bytemover_multi::reanimate`.
    pub fn open_leaf(self) -> Result<Box<dyn Handle>, HandleError> {
        match self {
            Self::Memory { data } => Ok(Box::new(MemoryHandle::from_bytes(data))),
            Self::File { path } => Ok(Box::new(FileHandle::new(path))),
            Self::FileRange { path, ranges } => {
                Ok(Box::new(FileRangeHandle::with_ranges(path, ranges)))
            }
            Self::Composite { .. } => Err(HandleError::Contract(
                "composite descriptors cannot be rebuilt as a leaf handle".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_range_json_shape() {
        let desc = HandleDescriptor::FileRange {
            path: PathBuf::from("/data/a.grib"),
            ranges: vec![ByteRange::new(0, 10), ByteRange::new(20, 5)],
        };
        let json: serde_json::Value = serde_json::from_str(&desc.to_json().unwrap()).unwrap();
        assert_eq!(json["kind"], "file_range");
        assert_eq!(json["path"], "/data/a.grib");
        assert_eq!(json["ranges"][1]["offset"], 20);
        assert_eq!(json["ranges"][1]["length"], 5);
    }

    #[test]
    fn composite_omits_empty_lengths() {
        let desc = HandleDescriptor::Composite {
            parts: vec![HandleDescriptor::Memory { data: vec![1, 2] }],
            lengths: vec![],
        };
        let json = desc.to_json().unwrap();
        assert!(!json.contains("lengths"));
        assert_eq!(HandleDescriptor::from_json(&json).unwrap(), desc);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = HandleDescriptor::from_json(r#"{"kind":"socket","host":"x"}"#).unwrap_err();
        assert!(matches!(err, HandleError::Json(_)));
    }

    #[test]
    fn open_leaf_builds_memory_handle() {
        let mut h = HandleDescriptor::Memory {
            data: b"abc".to_vec(),
        }
        .open_leaf()
        .unwrap();
        assert_eq!(h.open_for_read().unwrap(), 3);
        let mut buf = [0u8; 3];
        assert_eq!(h.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn open_leaf_refuses_composites() {
        let desc = HandleDescriptor::Composite {
            parts: vec![],
            lengths: vec![],
        };
        assert_eq!(desc.kind_name(), "composite");
        assert!(matches!(desc.open_leaf(), Err(HandleError::Contract(_))));
    }
}
