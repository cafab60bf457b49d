//! Look-ahead decorators.
//!
//! [`PeekBuffer`] reads ahead without consuming; [`PeekWindow`] turns the
//! peeked prefix into a seekable stream so a format probe can re-read it.

mod buffer;
pub mod sniff;
mod window;

pub use buffer::PeekBuffer;
pub use sniff::ContentKind;
pub use window::PeekWindow;
