//! Provider plugins and their registry.
//!
//! Providers implement the `Create/Update/Delete/Diff` capability for the
//! resource types they own and are resolved by type token.

mod echo;
mod plugin;
mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use echo::EchoProvider;
pub use plugin::{CreateResponse, DiffResponse, PartialState, PluginInfo, Provider};
pub use registry::ProviderRegistry;

#[cfg(test)]
pub use plugin::MockProvider;
