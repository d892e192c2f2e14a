//! Kubernetes controllers
//!
//! The reconciler that watches NetworkAttachmentDefinitions and drives
//! the VLAN provider.

mod context;
mod nad;

pub use context::{Context, ObservedNad};
pub use nad::NadController;
