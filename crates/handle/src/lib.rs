//! Handle contract and local backends.
//!
//! A [`Handle`] is a virtual byte stream: a file, an in-memory buffer, a set
//! of file ranges, or a decorator built on top of other handles. The
//! composite, peek and transfer crates only ever talk to this trait.

mod descriptor;
mod error;
mod file;
mod handle;
mod memory;
mod range;

pub use descriptor::{ByteRange, HandleDescriptor};
pub use error::HandleError;
pub use file::FileHandle;
pub use handle::{
    CostMap, Handle, HandleKind, close_after, local_node, read_fully, with_read, write_all,
};
pub use memory::MemoryHandle;
pub use range::FileRangeHandle;
