//! Core shared types for the fabric services synchronizer
//!
//! This crate holds the pure data types consumed by both the topology
//! controller and the admission webhook: the VLAN trunk range parser,
//! the node topology model carried in node annotations, and the
//! NetworkAttachmentDefinition eligibility / update classification.
//!
//! It deliberately has no Kubernetes client dependency.

pub mod nad;
pub mod topology;
pub mod vlan;

pub use nad::{NadAction, NetConf};
pub use topology::{Bond, Nic, NicMap, NodeTopology};
pub use vlan::parse_vlan_range;
