//! Durable mirror of every fabric object this operator has created.
//!
//! The mirror is the local source of truth between restarts: the engine
//! mutates it in memory and `FssClient::txn_done` persists it to the
//! `fss-database` ConfigMap as one JSON document.

use super::model::{Subnet, Tenant, Vlan};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One attached host port and the association that attached it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortAssociation {
    pub host_port_id: String,
    pub host_port_association_id: String,
}

/// The mirror document persisted under the `database` ConfigMap key.
///
/// Keys: tenants by `fssWorkloadEvpnId`, subnets by `fssSubnetId`, label
/// maps by `fssSubnetId` then [`Vlan`], host ports by node then port
/// name, attached ports by host port label id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Database {
    pub tenants: BTreeMap<String, Tenant>,
    pub subnets: BTreeMap<String, Subnet>,
    pub host_port_labels: BTreeMap<String, BTreeMap<Vlan, String>>,
    pub attached_labels: BTreeMap<String, BTreeMap<Vlan, String>>,
    pub host_ports: BTreeMap<String, BTreeMap<String, String>>,
    pub attached_ports: BTreeMap<String, Vec<PortAssociation>>,
    pub workload_mapping: BTreeMap<String, String>,
    pub subnet_mapping: BTreeMap<String, BTreeMap<String, String>>,
}

impl Database {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn workload_id(&self, workload_evpn_name: &str) -> Option<String> {
        self.workload_mapping.get(workload_evpn_name).cloned()
    }

    pub fn subnet_id(&self, workload_evpn_id: &str, subnet_name: &str) -> Option<String> {
        self.subnet_mapping.get(workload_evpn_id)?.get(subnet_name).cloned()
    }

    pub fn label(&self, subnet_id: &str, vlan: Vlan) -> Option<String> {
        self.host_port_labels.get(subnet_id)?.get(&vlan).cloned()
    }

    pub fn attached_label(&self, subnet_id: &str, vlan: Vlan) -> Option<String> {
        self.attached_labels.get(subnet_id)?.get(&vlan).cloned()
    }

    pub fn host_port(&self, node: &str, port: &str) -> Option<String> {
        self.host_ports.get(node)?.get(port).cloned()
    }

    pub fn is_port_attached(&self, label_id: &str, host_port_id: &str) -> bool {
        self.attached_ports
            .get(label_id)
            .is_some_and(|ports| ports.iter().any(|p| p.host_port_id == host_port_id))
    }

    /// Records a freshly created tenant and its name mapping.
    pub fn insert_tenant(&mut self, tenant: Tenant) {
        self.workload_mapping.insert(
            tenant.fss_workload_evpn_name.clone(),
            tenant.fss_workload_evpn_id.clone(),
        );
        self.subnet_mapping
            .entry(tenant.fss_workload_evpn_id.clone())
            .or_default();
        self.tenants
            .insert(tenant.fss_workload_evpn_id.clone(), tenant);
    }

    /// Records a freshly created subnet under its tenant.
    pub fn insert_subnet(&mut self, workload_evpn_id: &str, subnet: Subnet) {
        self.subnet_mapping
            .entry(workload_evpn_id.to_string())
            .or_default()
            .insert(subnet.fss_subnet_name.clone(), subnet.fss_subnet_id.clone());
        self.host_port_labels
            .entry(subnet.fss_subnet_id.clone())
            .or_default();
        self.attached_labels
            .entry(subnet.fss_subnet_id.clone())
            .or_default();
        self.subnets.insert(subnet.fss_subnet_id.clone(), subnet);
    }

    pub fn insert_label(&mut self, subnet_id: &str, vlan: Vlan, label_id: String) {
        self.host_port_labels
            .entry(subnet_id.to_string())
            .or_default()
            .insert(vlan, label_id);
    }

    pub fn mark_attached(&mut self, subnet_id: &str, vlan: Vlan, label_id: String) {
        self.attached_labels
            .entry(subnet_id.to_string())
            .or_default()
            .insert(vlan, label_id);
    }

    pub fn insert_host_port(&mut self, node: &str, port: &str, host_port_id: String) {
        self.host_ports
            .entry(node.to_string())
            .or_default()
            .insert(port.to_string(), host_port_id);
    }

    pub fn push_port_association(
        &mut self,
        label_id: &str,
        host_port_id: String,
        association_id: String,
    ) {
        self.attached_ports
            .entry(label_id.to_string())
            .or_default()
            .push(PortAssociation {
                host_port_id,
                host_port_association_id: association_id,
            });
    }

    /// Removes and returns the association ids attaching `host_port_id`
    /// to `label_id` (at most one by construction).
    pub fn take_port_associations(&mut self, label_id: &str, host_port_id: &str) -> Vec<String> {
        let Some(ports) = self.attached_ports.get_mut(label_id) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        ports.retain(|association| {
            if association.host_port_id == host_port_id {
                removed.push(association.host_port_association_id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Drops a host port label and every port attached through it.
    pub fn remove_label(&mut self, subnet_id: &str, vlan: Vlan, label_id: &str) {
        if let Some(labels) = self.host_port_labels.get_mut(subnet_id) {
            labels.remove(&vlan);
        }
        if let Some(labels) = self.attached_labels.get_mut(subnet_id) {
            labels.remove(&vlan);
        }
        self.attached_ports.remove(label_id);
    }

    pub fn attached_labels_empty(&self, subnet_id: &str) -> bool {
        self.attached_labels
            .get(subnet_id)
            .is_none_or(|labels| labels.is_empty())
    }

    pub fn subnet_mapping_empty(&self, workload_evpn_id: &str) -> bool {
        self.subnet_mapping
            .get(workload_evpn_id)
            .is_none_or(|subnets| subnets.is_empty())
    }

    /// Drops a subnet together with its name mapping and label tables.
    pub fn remove_subnet(&mut self, workload_evpn_id: &str, subnet_id: &str) -> Option<Subnet> {
        let subnet = self.subnets.remove(subnet_id)?;
        if let Some(mapping) = self.subnet_mapping.get_mut(workload_evpn_id) {
            mapping.remove(&subnet.fss_subnet_name);
        }
        self.host_port_labels.remove(subnet_id);
        self.attached_labels.remove(subnet_id);
        Some(subnet)
    }

    /// Drops a tenant together with its name and subnet mappings.
    pub fn remove_tenant(&mut self, workload_evpn_id: &str) -> Option<Tenant> {
        let tenant = self.tenants.remove(workload_evpn_id)?;
        self.workload_mapping.remove(&tenant.fss_workload_evpn_name);
        self.subnet_mapping.remove(workload_evpn_id);
        Some(tenant)
    }

    /// Whether a host port label id is known to the mirror, created or
    /// attached.
    pub fn knows_label(&self, label_id: &str) -> bool {
        self.host_port_labels
            .values()
            .chain(self.attached_labels.values())
            .any(|labels| labels.values().any(|id| id == label_id))
    }

    /// Whether a host port id is known to the mirror.
    pub fn knows_host_port(&self, host_port_id: &str) -> bool {
        self.host_ports
            .values()
            .any(|ports| ports.values().any(|id| id == host_port_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(evpn_id: &str, name: &str) -> Tenant {
        Tenant {
            fss_workload_evpn_id: evpn_id.to_string(),
            fss_workload_evpn_name: name.to_string(),
            name: format!("tenant-{name}"),
            id: format!("{evpn_id}-obj"),
            ..Tenant::default()
        }
    }

    fn subnet(subnet_id: &str, name: &str) -> Subnet {
        Subnet {
            fss_subnet_id: subnet_id.to_string(),
            fss_subnet_name: name.to_string(),
            name: format!("subnet-{name}"),
            id: format!("{subnet_id}-obj"),
            ..Subnet::default()
        }
    }

    /// The name mappings must agree with the object tables in both
    /// directions.
    fn assert_mappings_consistent(db: &Database) {
        for (name, evpn_id) in &db.workload_mapping {
            assert_eq!(&db.tenants[evpn_id].fss_workload_evpn_name, name);
        }
        for (evpn_id, tenant) in &db.tenants {
            assert_eq!(db.workload_mapping.get(&tenant.fss_workload_evpn_name), Some(evpn_id));
        }
        for (evpn_id, subnets) in &db.subnet_mapping {
            for (name, subnet_id) in subnets {
                let subnet = &db.subnets[subnet_id];
                assert_eq!(&subnet.fss_subnet_name, name);
                assert!(db.tenants.contains_key(evpn_id));
            }
        }
        for (subnet_id, labels) in &db.attached_labels {
            for (vlan, label) in labels {
                assert_eq!(db.host_port_labels[subnet_id].get(vlan), Some(label));
            }
        }
    }

    fn populated() -> Database {
        let mut db = Database::default();
        db.insert_tenant(tenant("W1", "projA"));
        db.insert_subnet("W1", subnet("N1", "subX"));
        db.insert_label("N1", Vlan::Tagged(100), "L1".to_string());
        db.mark_attached("N1", Vlan::Tagged(100), "L1".to_string());
        db.insert_host_port("n1", "eth0", "P1".to_string());
        db.push_port_association("L1", "P1".to_string(), "PA1".to_string());
        db
    }

    #[test]
    fn test_mappings_stay_consistent() {
        let db = populated();
        assert_mappings_consistent(&db);
        assert_eq!(db.workload_id("projA").unwrap(), "W1");
        assert_eq!(db.subnet_id("W1", "subX").unwrap(), "N1");
        assert_eq!(db.label("N1", Vlan::Tagged(100)).unwrap(), "L1");
        assert!(db.is_port_attached("L1", "P1"));
        assert!(db.knows_label("L1"));
        assert!(db.knows_host_port("P1"));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let db = populated();
        let encoded = db.encode().unwrap();
        assert!(encoded.contains(r#""value-100":"L1""#));
        assert!(encoded.contains(r#""Tenants""#));
        assert!(encoded.contains(r#""WorkloadMapping""#));
        let decoded = Database::decode(&encoded).unwrap();
        assert_eq!(decoded, db);
    }

    #[test]
    fn test_decode_empty_document() {
        assert_eq!(Database::decode("{}").unwrap(), Database::default());
    }

    #[test]
    fn test_remove_label_drops_attached_ports() {
        let mut db = populated();
        db.remove_label("N1", Vlan::Tagged(100), "L1");
        assert!(db.attached_labels_empty("N1"));
        assert!(!db.knows_label("L1"));
        assert!(db.attached_ports.get("L1").is_none());
        assert_mappings_consistent(&db);
    }

    #[test]
    fn test_upward_removal_clears_mappings() {
        let mut db = populated();
        db.remove_label("N1", Vlan::Tagged(100), "L1");
        let subnet = db.remove_subnet("W1", "N1").unwrap();
        assert_eq!(subnet.fss_subnet_name, "subX");
        assert!(db.subnet_mapping_empty("W1"));
        let tenant = db.remove_tenant("W1").unwrap();
        assert_eq!(tenant.fss_workload_evpn_name, "projA");
        assert!(db.workload_mapping.is_empty());
        assert!(db.subnet_mapping.is_empty());
        assert_mappings_consistent(&db);
    }

    #[test]
    fn test_take_port_associations_removes_entry() {
        let mut db = populated();
        assert_eq!(db.take_port_associations("L1", "P1"), vec!["PA1".to_string()]);
        assert!(!db.is_port_attached("L1", "P1"));
        assert!(db.take_port_associations("L1", "P1").is_empty());
    }
}
