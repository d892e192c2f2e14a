//! Custom resource definitions
//!
//! The NetworkAttachmentDefinition type the controller watches, plus the
//! derivation of fabric targets from one NAD.

pub mod nad;

pub use nad::{fabric_targets, FabricTarget, NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec};
