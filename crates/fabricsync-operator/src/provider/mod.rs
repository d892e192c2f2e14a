//! VLAN provider backends.
//!
//! The topology controller drives secondary networks through this
//! contract; the baremetal implementation synchronizes them to a Fabric
//! Services System.

mod fss;

pub use fss::FssVlanProvider;

use crate::fss::FssError;
use async_trait::async_trait;
use fabricsync_core::nad::NadAction;
use fabricsync_core::topology::NodeTopology;
use std::collections::BTreeMap;

/// Per-node outcome of a bulk attach/detach; `None` means success.
pub type NodesStatus = BTreeMap<String, Option<FssError>>;

/// Backend contract consumed by the topology controller.
#[async_trait]
pub trait VlanProvider: Send + Sync {
    /// Connects to the backend and performs its startup handshake.
    async fn connect(&mut self, client: kube::Client, namespace: &str) -> Result<(), FssError>;

    /// Gives the backend a chance to rewrite a node's topology before
    /// it is published.
    async fn update_node_topology(
        &self,
        node: &str,
        topology: String,
    ) -> Result<String, FssError>;

    /// Opens a VLAN range for a `(workload, subnet)` pair on the given
    /// nodes. Per-node failures are reported in the result map; a
    /// global failure aborts the operation.
    async fn attach(
        &mut self,
        workload_evpn_name: &str,
        subnet_name: &str,
        vlan_range: &str,
        nodes: &BTreeMap<String, NodeTopology>,
        request_type: NadAction,
    ) -> Result<NodesStatus, FssError>;

    /// Closes a VLAN range, either deleting the labels (`DeleteDetach`
    /// / `UpdateDetach`) or detaching the given nodes' ports.
    async fn detach(
        &mut self,
        workload_evpn_name: &str,
        subnet_name: &str,
        vlan_range: &str,
        nodes: &BTreeMap<String, NodeTopology>,
        request_type: NadAction,
    ) -> Result<NodesStatus, FssError>;

    /// Forgets a node entirely, deleting all of its host ports.
    async fn detach_node(&mut self, node: &str);

    /// Persists the backend's bookkeeping; ends one NAD transaction.
    async fn txn_done(&mut self);
}

/// Creates the provider backend named on the command line.
pub fn new_vlan_provider(
    provider: &str,
    config_file: &str,
) -> Result<Box<dyn VlanProvider>, FssError> {
    match provider {
        "baremetal" => Ok(Box::new(FssVlanProvider::new(config_file))),
        other => Err(FssError::Config(format!("not supported provider: {other:?}"))),
    }
}
