//! Fabric Services Synchronizer Operator Library
//!
//! Watches NetworkAttachmentDefinitions describing VLAN-backed secondary
//! networks and mirrors them as fabric objects on an external Fabric
//! Services System via its REST API. Durable bookkeeping lives in the
//! `fss-database` ConfigMap so the fabric view survives restarts; a
//! three-phase resync removes divergence on startup.

pub mod config;
pub mod controllers;
pub mod crds;
pub mod fss;
pub mod provider;

pub use crds::NetworkAttachmentDefinition;
