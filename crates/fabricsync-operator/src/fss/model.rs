//! FSS Connect wire model.
//!
//! Field casing follows the FSS Connect API exactly; note the two
//! inconsistent spellings of the host-port-label reference
//! (`hostPortLabelID` on subnet associations, `hostPortLabelId` on host
//! port associations) and `pluginID` on deployments.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Token grant returned by the auth endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_expires_in: i64,
}

/// Error body the fabric attaches to non-success statuses.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ErrorResponse {
    pub title: String,
    pub detail: String,
    pub errors: Vec<String>,
    pub status: i32,
}

/// Operator identity registered once with the fabric.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Plugin {
    pub connect_type: String,
    pub name: String,
    pub supports_new_deployments: bool,
    pub id: String,
}

/// Per-cluster activation of a [`Plugin`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Deployment {
    pub admin_up: bool,
    pub name: String,
    #[serde(rename = "pluginID")]
    pub plugin_id: String,
    pub region_id: String,
    pub id: String,
    pub status: String,
}

/// Fabric-side customer container, one per workload EVPN.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tenant {
    pub deployment_id: String,
    pub fss_workload_evpn_id: String,
    pub fss_workload_evpn_name: String,
    pub name: String,
    pub fss_managed: bool,
    pub id: String,
    pub status: String,
}

/// Fabric-side L2/L3 segment within a tenant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subnet {
    pub deployment_id: String,
    pub tenant_id: String,
    pub fss_subnet_id: String,
    pub fss_subnet_name: String,
    pub name: String,
    pub fss_managed: bool,
    pub id: String,
    pub status: String,
}

/// VLAN tag bundle attached to a subnet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostPortLabel {
    pub deployment_id: String,
    pub name: String,
    pub id: String,
    pub status: String,
}

/// Edge object joining a [`HostPortLabel`] to a [`Subnet`] for one VLAN.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubnetAssociation {
    pub deployment_id: String,
    #[serde(rename = "hostPortLabelID")]
    pub host_port_label_id: String,
    pub subnet_id: String,
    pub vlan_type: String,
    pub vlan_value: String,
    pub id: String,
    pub status: String,
}

/// Fabric-side record of one NIC on one node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostPort {
    pub deployment_id: String,
    pub host_name: String,
    pub port_name: String,
    pub name: String,
    pub id: String,
    pub mac_address: String,
    pub is_lag: bool,
    pub parent_host_port_id: String,
    pub status: String,
}

/// Edge object joining a [`HostPortLabel`] to a [`HostPort`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostPortAssociation {
    pub deployment_id: String,
    pub host_port_id: String,
    pub host_port_label_id: String,
    pub id: String,
    pub status: String,
}

/// VLAN descriptor used as a compound key in the mirror.
///
/// VLAN id 0 denotes the untagged VLAN. Persisted as `"<type>-<value>"`
/// (`"value-42"`, `"untagged-"`), which is also its serde form so it can
/// key JSON maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Vlan {
    Untagged,
    Tagged(u16),
}

impl Vlan {
    pub fn from_id(vlan_id: u16) -> Self {
        if vlan_id == 0 {
            Vlan::Untagged
        } else {
            Vlan::Tagged(vlan_id)
        }
    }

    pub fn vlan_type(&self) -> &'static str {
        match self {
            Vlan::Untagged => "untagged",
            Vlan::Tagged(_) => "value",
        }
    }

    pub fn vlan_value(&self) -> String {
        match self {
            Vlan::Untagged => String::new(),
            Vlan::Tagged(id) => id.to_string(),
        }
    }
}

impl fmt::Display for Vlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.vlan_type(), self.vlan_value())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid vlan key {0:?}")]
pub struct InvalidVlanKey(String);

impl FromStr for Vlan {
    type Err = InvalidVlanKey;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == "untagged-" {
            return Ok(Vlan::Untagged);
        }
        raw.strip_prefix("value-")
            .and_then(|value| value.parse().ok())
            .map(Vlan::Tagged)
            .ok_or_else(|| InvalidVlanKey(raw.to_string()))
    }
}

impl Serialize for Vlan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Vlan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
