//! Composite handles.
//!
//! [`CompositeHandle`] strings several handles into one stream and fuses
//! mergeable neighbours; [`PartHandle`] chains keep the original positions
//! after a non-adjacent fusion.

mod composite;
mod part;

pub use composite::CompositeHandle;
pub use part::{PartChain, PartHandle};

use bytemover_handle::{Handle, HandleDescriptor, HandleError};

/// Rebuilds a handle from its descriptor, composites included.
///
/// Parts are restored one for one; nothing is merged on the way.
pub fn reanimate(descriptor: HandleDescriptor) -> Result<Box<dyn Handle>, HandleError> {
    match descriptor {
        HandleDescriptor::Composite { parts, lengths } => {
            let parts = parts
                .into_iter()
                .map(reanimate)
                .collect::<Result<Vec<_>, _>>()?;
            let mut composite = CompositeHandle::from_parts(parts);
            for length in lengths {
                composite.declare_length(length);
            }
            Ok(Box::new(composite))
        }
        leaf => leaf.open_leaf(),
    }
}
