//! Desired-state input: resource registrations and the sources producing them.

mod manifest;
mod registration;
mod source;

pub use manifest::{ProgramManifest, ResourceDecl};
pub use registration::Registration;
pub use source::{ChannelSource, DesiredStateSource, StaticSource};
