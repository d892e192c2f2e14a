//! Fabric Services System client.
//!
//! Everything the operator knows about the fabric lives here: the wire
//! model, the authenticated REST transport, the durable mirror and its
//! ConfigMap store, the registration bootstrap, the fabric object
//! engine, and the startup resync.

mod client;
mod database;
mod error;
mod model;
mod resync;
mod store;
mod transport;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{FssClient, LabelLookup};
pub use database::{Database, PortAssociation};
pub use error::FssError;
pub use model::{
    Deployment, ErrorResponse, HostPort, HostPortAssociation, HostPortLabel, LoginResponse,
    Plugin, Subnet, SubnetAssociation, Tenant, Vlan,
};
pub use store::{ConfigMapStore, MirrorStore, CONFIGMAP_NAME, DATABASE_KEY, DEPLOYMENT_KEY, PLUGIN_KEY};
pub use transport::{paths, FssTransport, RestTransport};
