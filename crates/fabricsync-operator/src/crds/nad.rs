//! NetworkAttachmentDefinition CRD
//!
//! The upstream `k8s.cni.cncf.io/v1` resource: a name plus a free-form
//! CNI config document. Everything the fabric cares about lives in the
//! config and the annotations.

use fabricsync_core::nad::{
    self, Annotations, NadError, NetConf, EXT_NETWORK_NAME_KEY, EXT_PROJECT_NAME_KEY,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// NetworkAttachmentDefinition describes a secondary network for pods.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    plural = "network-attachment-definitions",
    namespaced
)]
pub struct NetworkAttachmentDefinitionSpec {
    /// Embedded CNI configuration document.
    #[serde(default)]
    pub config: String,
}

/// One fabric synchronization target derived from a NAD: a VLAN range
/// to open on one subnet of one workload EVPN.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FabricTarget {
    pub workload_evpn_name: String,
    pub subnet_name: String,
    pub vlan_range: String,
}

/// Derives the fabric targets of an eligible NAD.
///
/// SR-IOV trunk NADs carry one target per overlay entry; everything
/// else names a single `(project, network, vlan)` triple through its
/// annotations.
pub fn fabric_targets(
    conf: &NetConf,
    annotations: &Annotations,
) -> Result<Vec<FabricTarget>, NadError> {
    if conf.is_trunk() {
        return Ok(nad::sriov_overlays(annotations)?
            .into_iter()
            .map(|overlay| FabricTarget {
                workload_evpn_name: overlay.ext_project_name,
                subnet_name: overlay.ext_network_name,
                vlan_range: overlay.vlan_range,
            })
            .collect());
    }
    let project = annotations.get(EXT_PROJECT_NAME_KEY).filter(|v| !v.is_empty());
    let network = annotations.get(EXT_NETWORK_NAME_KEY).filter(|v| !v.is_empty());
    match (project, network) {
        (Some(project), Some(network)) => Ok(vec![FabricTarget {
            workload_evpn_name: project.clone(),
            subnet_name: network.clone(),
            vlan_range: conf.vlan.to_string(),
        }]),
        _ => Err(NadError::MissingProjectNetwork),
    }
}
