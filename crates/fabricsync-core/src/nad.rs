//! NetworkAttachmentDefinition eligibility and update classification.
//!
//! A NAD describes a VLAN-backed secondary network through its embedded
//! CNI config plus a handful of annotations. This module decides whether
//! a NAD concerns the fabric at all, validates its shape, and classifies
//! edits into the actions the topology controller has to perform.

use crate::vlan::{parse_vlan_range, InvalidVlanRange};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use strum::Display;
use thiserror::Error;

/// Node annotation carrying the discovered NIC layout.
pub const NETWORK_TOPOLOGY_KEY: &str = "nokia.com/network-topology";
/// NAD annotation naming the SR-IOV resource pool.
pub const SRIOV_RESOURCE_KEY: &str = "k8s.v1.cni.cncf.io/resourceName";
/// NAD annotation selecting the nodes the network spans.
pub const NODE_SELECTOR_KEY: &str = "k8s.v1.cni.cncf.io/nodeSelector";
/// NAD annotation naming the fabric workload EVPN (tenant).
pub const EXT_PROJECT_NAME_KEY: &str = "nokia.com/extProjectName";
/// NAD annotation naming the fabric subnet.
pub const EXT_NETWORK_NAME_KEY: &str = "nokia.com/extNetworkName";
/// NAD annotation listing per-overlay tenant/subnet/range triples for
/// SR-IOV trunks.
pub const SRIOV_OVERLAYS_KEY: &str = "nokia.com/sriov-vf-vlan-trunk-overlays";
/// NAD annotation the per-node agent reports attachment status under.
pub const NETWORK_STATUS_KEY: &str = "nokia.com/network-status";

/// Kubernetes object annotations.
pub type Annotations = BTreeMap<String, String>;

/// Action derived from a NAD event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum NadAction {
    /// NAD created: create host interfaces.
    Create,
    /// NAD deleted: delete host interfaces.
    Delete,
    /// NAD created: open the VLAN on the fabric.
    CreateAttach,
    /// NAD deleted: close the VLAN on the fabric.
    DeleteDetach,
    /// NAD updated: nodeSelector changed.
    UpdateAttachDetach,
    /// NAD updated: became in scope (or its trunk grew).
    UpdateAttach,
    /// NAD updated: became out of scope.
    UpdateDetach,
    /// Node joined the selector: open the VLAN on its ports.
    NodeAttach,
    /// Node left the selector: close the VLAN on its ports.
    NodeDetach,
    /// Set of nodes using the VLAN changed.
    NodeAttachDetach,
}

impl NadAction {
    /// Whether this action ends with the subnet association in place.
    pub fn attaches_subnet(&self) -> bool {
        matches!(self, NadAction::CreateAttach | NadAction::UpdateAttach)
    }

    /// Whether this action removes the VLAN label (and possibly
    /// collapses the subnet and tenant) rather than detaching ports.
    pub fn deletes_label(&self) -> bool {
        matches!(self, NadAction::DeleteDetach | NadAction::UpdateDetach)
    }
}

/// The subset of the CNI config the fabric synchronizer cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetConf {
    #[serde(rename = "type", default)]
    pub cni_type: String,
    #[serde(default)]
    pub master: String,
    #[serde(default)]
    pub vlan: i32,
    #[serde(default)]
    pub vlan_trunk: String,
}

impl NetConf {
    /// SR-IOV trunk mode carries per-overlay project/network names
    /// instead of the plain project/network annotations.
    pub fn is_trunk(&self) -> bool {
        self.cni_type == "sriov" && !self.vlan_trunk.is_empty()
    }
}

/// One entry of the SR-IOV overlay annotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlanOverlay {
    pub ext_project_name: String,
    pub ext_network_name: String,
    pub vlan_range: String,
}

/// Validation and classification failures.
#[derive(Debug, Error)]
pub enum NadError {
    #[error("read NAD config failed: {0}")]
    Config(serde_json::Error),
    #[error("ipvlan vlan field has invalid value, valid range 1..4095")]
    IpvlanVlanRange,
    #[error("ipvlan master field must start with 'tenant' or 'provider'")]
    IpvlanMaster,
    #[error("sriov NAD requires a resource name annotation")]
    MissingResourceName,
    #[error("vlan value is out of bound, valid range 0..4095")]
    SriovVlanRange,
    #[error("invalid vlan_trunk in CNI config: {0}")]
    InvalidVlanTrunk(#[source] InvalidVlanRange),
    #[error("missing {SRIOV_OVERLAYS_KEY} annotation")]
    MissingOverlays,
    #[error("invalid {SRIOV_OVERLAYS_KEY} annotation: {0}")]
    InvalidOverlays(#[source] serde_json::Error),
    #[error("invalid vlan range {range:?} in overlay for {network:?}")]
    InvalidOverlayRange { network: String, range: String },
    #[error("different vlan ranges found in CNI config and annotations")]
    OverlayMismatch,
    #[error("missing project/network annotations")]
    MissingProjectNetwork,
    #[error("NAD change from eligible to not eligible is not allowed")]
    EligibilityRevoked,
    #[error("NAD type change is not allowed")]
    TypeChanged,
    #[error("NAD vlan change is not allowed")]
    VlanChanged,
    #[error("SRIOV NAD resourceName change is not allowed")]
    ResourceNameChanged,
    #[error("NAD project change is not allowed")]
    ProjectChanged,
    #[error("NAD network change is not allowed")]
    NetworkChanged,
    #[error("SRIOV NAD vlan_trunk range can only increase")]
    TrunkShrunk,
    #[error("SRIOV NAD vlan_trunk range and nodeSelector are not allowed to change together")]
    TrunkAndSelectorChanged,
}

fn annotation<'a>(annotations: &'a Annotations, key: &str) -> &'a str {
    annotations.get(key).map(String::as_str).unwrap_or_default()
}

/// Extracts the relevant CNI plugin config from a NAD config document.
///
/// The config is schema-free JSON, possibly a plugin chain: the first
/// `plugins[]` element of type `ipvlan` or `sriov` wins, otherwise the
/// top level itself is decoded.
pub fn net_conf(config: &str) -> Result<NetConf, NadError> {
    let document: Value = serde_json::from_str(config).map_err(NadError::Config)?;
    if let Some(plugins) = document.get("plugins").and_then(Value::as_array) {
        for plugin in plugins {
            if matches!(
                plugin.get("type").and_then(Value::as_str),
                Some("ipvlan") | Some("sriov")
            ) {
                return serde_json::from_value(plugin.clone()).map_err(NadError::Config);
            }
        }
        Ok(NetConf::default())
    } else {
        serde_json::from_value(document).map_err(NadError::Config)
    }
}

/// Parses and validates the SR-IOV overlay annotation.
pub fn sriov_overlays(annotations: &Annotations) -> Result<Vec<VlanOverlay>, NadError> {
    let raw = annotations
        .get(SRIOV_OVERLAYS_KEY)
        .filter(|v| !v.is_empty())
        .ok_or(NadError::MissingOverlays)?;
    let overlays: Vec<VlanOverlay> =
        serde_json::from_str(raw).map_err(NadError::InvalidOverlays)?;
    for overlay in &overlays {
        parse_vlan_range(&overlay.vlan_range).map_err(|_| NadError::InvalidOverlayRange {
            network: overlay.ext_network_name.clone(),
            range: overlay.vlan_range.clone(),
        })?;
    }
    Ok(overlays)
}

/// Decides whether a NAD is eligible for fabric synchronization.
///
/// Returns the extracted config together with the verdict; shape errors
/// on an otherwise in-scope NAD are reported as errors so the admission
/// webhook can reject them.
pub fn should_trigger_topo_action(
    config: &str,
    annotations: &Annotations,
) -> Result<(NetConf, bool), NadError> {
    let conf = net_conf(config)?;
    if conf.cni_type != "ipvlan" && conf.cni_type != "sriov" {
        return Ok((conf, false));
    }
    if annotation(annotations, NODE_SELECTOR_KEY).is_empty() {
        return Ok((conf, false));
    }

    let mut vlan_mode = true;
    match conf.cni_type.as_str() {
        "ipvlan" => {
            if !(1..=4095).contains(&conf.vlan) {
                return Err(NadError::IpvlanVlanRange);
            }
            if !conf.master.starts_with("tenant") && !conf.master.starts_with("provider") {
                return Err(NadError::IpvlanMaster);
            }
        }
        _ => {
            if annotation(annotations, SRIOV_RESOURCE_KEY).is_empty() {
                return Err(NadError::MissingResourceName);
            }
            if !conf.vlan_trunk.is_empty() {
                vlan_mode = false;
            } else if !(0..=4095).contains(&conf.vlan) {
                return Err(NadError::SriovVlanRange);
            }
        }
    }

    if vlan_mode {
        if annotation(annotations, EXT_PROJECT_NAME_KEY).is_empty()
            || annotation(annotations, EXT_NETWORK_NAME_KEY).is_empty()
        {
            return Ok((conf, false));
        }
    } else {
        let trunk_ids: BTreeSet<u16> = parse_vlan_range(&conf.vlan_trunk)
            .map_err(NadError::InvalidVlanTrunk)?
            .into_iter()
            .collect();
        let mut overlay_ids = BTreeSet::new();
        for overlay in sriov_overlays(annotations)? {
            // Validated above, parse cannot fail here.
            overlay_ids.extend(parse_vlan_range(&overlay.vlan_range).unwrap_or_default());
        }
        if trunk_ids != overlay_ids {
            return Err(NadError::OverlayMismatch);
        }
    }
    Ok((conf, true))
}

/// Classifies a NAD update into the action the controller must take.
///
/// Returns `None` when the edit needs no fabric work; disallowed edits
/// (scope revocation, identity changes, trunk shrinkage) are errors.
pub fn should_trigger_topo_update(
    old_config: &str,
    old_annotations: &Annotations,
    new_config: &str,
    new_annotations: &Annotations,
) -> Result<(Option<NadAction>, NetConf), NadError> {
    // An already-stored NAD that fails validation is simply out of scope.
    let (old_conf, old_eligible) = match should_trigger_topo_action(old_config, old_annotations) {
        Ok(result) => result,
        Err(_) => (net_conf(old_config).unwrap_or_default(), false),
    };
    let (new_conf, new_eligible) = should_trigger_topo_action(new_config, new_annotations)?;

    match (old_eligible, new_eligible) {
        (false, false) => return Ok((None, new_conf)),
        (false, true) => return Ok((Some(NadAction::UpdateAttach), new_conf)),
        (true, false) => return Err(NadError::EligibilityRevoked),
        (true, true) => {}
    }

    if old_conf.cni_type != new_conf.cni_type {
        return Err(NadError::TypeChanged);
    }
    if old_conf.vlan != new_conf.vlan {
        return Err(NadError::VlanChanged);
    }
    let vlan_mode = old_conf.vlan_trunk.is_empty();
    if new_conf.cni_type == "sriov"
        && annotation(old_annotations, SRIOV_RESOURCE_KEY)
            != annotation(new_annotations, SRIOV_RESOURCE_KEY)
    {
        return Err(NadError::ResourceNameChanged);
    }
    if vlan_mode {
        if annotation(old_annotations, EXT_PROJECT_NAME_KEY)
            != annotation(new_annotations, EXT_PROJECT_NAME_KEY)
        {
            return Err(NadError::ProjectChanged);
        }
        if annotation(old_annotations, EXT_NETWORK_NAME_KEY)
            != annotation(new_annotations, EXT_NETWORK_NAME_KEY)
        {
            return Err(NadError::NetworkChanged);
        }
    } else if old_conf.vlan_trunk != new_conf.vlan_trunk {
        let old_ids: BTreeSet<u16> = parse_vlan_range(&old_conf.vlan_trunk)
            .unwrap_or_default()
            .into_iter()
            .collect();
        let new_ids: BTreeSet<u16> = parse_vlan_range(&new_conf.vlan_trunk)
            .unwrap_or_default()
            .into_iter()
            .collect();
        if !old_ids.is_subset(&new_ids) {
            return Err(NadError::TrunkShrunk);
        }
    }

    let selector_changed = annotation(old_annotations, NODE_SELECTOR_KEY)
        != annotation(new_annotations, NODE_SELECTOR_KEY);
    if !vlan_mode && old_conf.vlan_trunk != new_conf.vlan_trunk {
        if selector_changed {
            return Err(NadError::TrunkAndSelectorChanged);
        }
        return Ok((Some(NadAction::UpdateAttach), new_conf));
    }
    if !selector_changed {
        return Ok((None, new_conf));
    }
    Ok((Some(NadAction::UpdateAttachDetach), new_conf))
}
