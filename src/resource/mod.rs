//! Resource model: identity, addressing and recorded state.

mod properties;
mod state;
mod urn;

pub use properties::{apply_ignore_changes, changed_keys, PropertyMap};
pub use state::ResourceState;
pub use urn::{StackRef, Urn, ROOT_STACK_TYPE, URN_PREFIX};
