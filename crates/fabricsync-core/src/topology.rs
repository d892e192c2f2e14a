//! Node topology model.
//!
//! Topology discovery publishes each node's NIC layout in the
//! `nokia.com/network-topology` node annotation. The JSON casing below
//! (`Bonds`, `SriovPools`, `Ports`, `mac-address`) is the wire contract
//! with the discovery side and must not change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One NIC as reported by topology discovery.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nic {
    pub name: String,
    #[serde(rename = "mac-address", default)]
    pub mac_address: String,
}

/// NICs keyed by port name.
pub type NicMap = BTreeMap<String, Nic>;

/// A bond and its member ports.
///
/// Only `802.3ad` bonds are modelled on the fabric as LAG parents;
/// any other mode is treated as a set of independent ports.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    #[serde(default)]
    pub mode: String,
    #[serde(rename = "mac-address", default)]
    pub mac_address: String,
    #[serde(rename = "Ports", default)]
    pub ports: NicMap,
}

impl Bond {
    /// Whether this bond is a LAG and its members must be modelled as
    /// slave ports of a parent host port.
    pub fn is_lag(&self) -> bool {
        self.mode == "802.3ad"
    }

    /// The bond itself viewed as a NIC (used as the LAG parent port).
    pub fn as_nic(&self, bond_name: &str) -> Nic {
        Nic {
            name: bond_name.to_string(),
            mac_address: self.mac_address.clone(),
        }
    }
}

/// Per-node NIC layout. ipvlan networks consume the bond side, sriov
/// networks the SR-IOV pool side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTopology {
    #[serde(rename = "Bonds", default)]
    pub bonds: BTreeMap<String, Bond>,
    #[serde(rename = "SriovPools", default)]
    pub sriov_pools: BTreeMap<String, NicMap>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_annotation_decodes_with_wire_casing() {
        let raw = r#"{
            "Bonds": {
                "tenant-bond": {
                    "mode": "802.3ad",
                    "mac-address": "aa:bb:cc:dd:ee:ff",
                    "Ports": {
                        "eth0": {"name": "eth0", "mac-address": "aa:bb:cc:dd:ee:00"},
                        "eth1": {"name": "eth1", "mac-address": "aa:bb:cc:dd:ee:01"}
                    }
                }
            },
            "SriovPools": {
                "sriov_pool_1": {
                    "eth2": {"name": "eth2", "mac-address": "aa:bb:cc:dd:ee:02"}
                }
            }
        }"#;
        let topology: NodeTopology = serde_json::from_str(raw).unwrap();
        let bond = &topology.bonds["tenant-bond"];
        assert!(bond.is_lag());
        assert_eq!(bond.ports.len(), 2);
        assert_eq!(bond.as_nic("tenant-bond").mac_address, "aa:bb:cc:dd:ee:ff");
        assert_eq!(
            topology.sriov_pools["sriov_pool_1"]["eth2"].name,
            "eth2"
        );
    }

    #[test]
    fn test_missing_sides_default_to_empty() {
        let topology: NodeTopology = serde_json::from_str("{}").unwrap();
        assert!(topology.bonds.is_empty());
        assert!(topology.sriov_pools.is_empty());
    }

    #[test]
    fn test_non_lag_bond() {
        let bond = Bond {
            mode: "active-backup".to_string(),
            ..Bond::default()
        };
        assert!(!bond.is_lag());
    }
}
