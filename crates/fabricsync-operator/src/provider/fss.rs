//! Baremetal VLAN provider backed by a Fabric Services System.

use super::{NodesStatus, VlanProvider};
use crate::config::AuthOpts;
use crate::fss::{ConfigMapStore, FssClient, FssError, RestTransport};
use async_trait::async_trait;
use fabricsync_core::nad::NadAction;
use fabricsync_core::topology::NodeTopology;
use fabricsync_core::vlan::parse_vlan_range;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

/// [`VlanProvider`] translating NAD actions into fabric object
/// operations across a set of nodes.
pub struct FssVlanProvider {
    config_file: PathBuf,
    client: Option<FssClient>,
}

impl FssVlanProvider {
    pub fn new(config_file: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
            client: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_client(client: FssClient) -> Self {
        Self {
            config_file: PathBuf::new(),
            client: Some(client),
        }
    }

    fn client_mut(&mut self) -> Result<&mut FssClient, FssError> {
        self.client.as_mut().ok_or(FssError::NotConnected)
    }
}

#[async_trait]
impl VlanProvider for FssVlanProvider {
    async fn connect(&mut self, client: kube::Client, namespace: &str) -> Result<(), FssError> {
        let cfg = AuthOpts::from_file(&self.config_file)
            .map_err(|e| FssError::Config(e.to_string()))?;
        let transport = RestTransport::connect(&cfg).await?;
        let store = ConfigMapStore::new(client, namespace);
        let fss_client =
            FssClient::connect(Box::new(transport), Box::new(store), &cfg).await?;
        self.client = Some(fss_client);
        info!("connected to fss");
        Ok(())
    }

    async fn update_node_topology(
        &self,
        _node: &str,
        topology: String,
    ) -> Result<String, FssError> {
        Ok(topology)
    }

    /// Two phases: all host ports first, the subnet association last,
    /// so the fabric opens the VLAN only once every port is known.
    async fn attach(
        &mut self,
        workload_evpn_name: &str,
        subnet_name: &str,
        vlan_range: &str,
        nodes: &BTreeMap<String, NodeTopology>,
        request_type: NadAction,
    ) -> Result<NodesStatus, FssError> {
        let client = self.client.as_mut().ok_or(FssError::NotConnected)?;
        let vlan_ids = parse_vlan_range(vlan_range)?;
        let mut nodes_status: NodesStatus =
            nodes.keys().map(|node| (node.clone(), None)).collect();

        info!(
            workload = workload_evpn_name,
            subnet = subnet_name,
            vlan_range,
            "attach step 1: create host port labels"
        );
        let mut subnet_id = String::new();
        let mut labels = Vec::with_capacity(vlan_ids.len());
        for &vlan_id in &vlan_ids {
            let (fss_subnet_id, label_id) = client
                .create_subnet_interface(workload_evpn_name, subnet_name, vlan_id)
                .await?;
            subnet_id = fss_subnet_id;
            labels.push((vlan_id, label_id));
        }

        info!(vlan_range, "attach step 2a: create and attach host ports");
        for (node_name, topology) in nodes {
            for (bond_name, bond) in &topology.bonds {
                if bond.is_lag() {
                    let parent_nic = bond.as_nic(bond_name);
                    let parent_id = match client
                        .create_host_port(node_name, &parent_nic, true, None)
                        .await
                    {
                        Ok(id) => id,
                        Err(e) => {
                            nodes_status.insert(node_name.clone(), Some(e));
                            continue;
                        }
                    };
                    for port in bond.ports.values() {
                        if let Err(e) = client
                            .create_host_port(node_name, port, false, Some(&parent_id))
                            .await
                        {
                            nodes_status.insert(node_name.clone(), Some(e));
                        }
                    }
                    for (_, label_id) in &labels {
                        if let Err(e) =
                            client.attach_host_port(label_id, node_name, &parent_nic).await
                        {
                            nodes_status.insert(node_name.clone(), Some(e));
                        }
                    }
                } else {
                    for port in bond.ports.values() {
                        match client.create_host_port(node_name, port, false, None).await {
                            Ok(_) => {
                                for (_, label_id) in &labels {
                                    if let Err(e) =
                                        client.attach_host_port(label_id, node_name, port).await
                                    {
                                        nodes_status.insert(node_name.clone(), Some(e));
                                    }
                                }
                            }
                            Err(e) => {
                                nodes_status.insert(node_name.clone(), Some(e));
                            }
                        }
                    }
                }
            }
            for pool in topology.sriov_pools.values() {
                for port in pool.values() {
                    match client.create_host_port(node_name, port, false, None).await {
                        Ok(_) => {
                            for (_, label_id) in &labels {
                                if let Err(e) =
                                    client.attach_host_port(label_id, node_name, port).await
                                {
                                    nodes_status.insert(node_name.clone(), Some(e));
                                }
                            }
                        }
                        Err(e) => {
                            nodes_status.insert(node_name.clone(), Some(e));
                        }
                    }
                }
            }
        }

        if request_type.attaches_subnet() {
            info!(subnet = %subnet_id, vlan_range, "attach step 2: attach labels to subnet");
            for (vlan_id, label_id) in &labels {
                client
                    .attach_subnet_interface(&subnet_id, *vlan_id, label_id)
                    .await?;
            }
        }
        Ok(nodes_status)
    }

    async fn detach(
        &mut self,
        workload_evpn_name: &str,
        subnet_name: &str,
        vlan_range: &str,
        nodes: &BTreeMap<String, NodeTopology>,
        request_type: NadAction,
    ) -> Result<NodesStatus, FssError> {
        let client = self.client.as_mut().ok_or(FssError::NotConnected)?;
        let vlan_ids = parse_vlan_range(vlan_range)?;
        let mut nodes_status: NodesStatus =
            nodes.keys().map(|node| (node.clone(), None)).collect();

        for &vlan_id in &vlan_ids {
            info!(
                workload = workload_evpn_name,
                subnet = subnet_name,
                vlan = vlan_id,
                "detach step 1: look up host port label"
            );
            let lookup = client.get_subnet_interface(workload_evpn_name, subnet_name, vlan_id);
            let (Some(workload_evpn_id), Some(subnet_id), Some(label_id)) =
                (lookup.workload_evpn_id, lookup.subnet_id, lookup.label_id)
            else {
                return Err(FssError::UnknownVlan(vlan_id));
            };

            if request_type.deletes_label() {
                info!(vlan = vlan_id, subnet = %subnet_id, "detach step 2: delete host port label");
                client
                    .delete_subnet_interface(
                        &workload_evpn_id,
                        &subnet_id,
                        vlan_id,
                        &label_id,
                        request_type,
                    )
                    .await?;
            } else {
                for (node_name, topology) in nodes {
                    for (bond_name, bond) in &topology.bonds {
                        if bond.is_lag() {
                            let parent_nic = bond.as_nic(bond_name);
                            let result =
                                client.detach_host_port(&label_id, node_name, &parent_nic).await;
                            nodes_status.insert(node_name.clone(), result.err());
                        } else {
                            for port in bond.ports.values() {
                                let result =
                                    client.detach_host_port(&label_id, node_name, port).await;
                                nodes_status.insert(node_name.clone(), result.err());
                            }
                        }
                    }
                    for pool in topology.sriov_pools.values() {
                        for port in pool.values() {
                            let result =
                                client.detach_host_port(&label_id, node_name, port).await;
                            nodes_status.insert(node_name.clone(), result.err());
                        }
                    }
                }
            }
        }
        Ok(nodes_status)
    }

    async fn detach_node(&mut self, node: &str) {
        if let Ok(client) = self.client_mut() {
            client.detach_node(node).await;
        }
    }

    async fn txn_done(&mut self) {
        if let Ok(client) = self.client_mut() {
            client.txn_done().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fss::fake::connected;
    use crate::fss::{paths, Database, Vlan, DATABASE_KEY};
    use fabricsync_core::topology::{Bond, Nic};

    fn nic(name: &str, mac: &str) -> Nic {
        Nic {
            name: name.to_string(),
            mac_address: mac.to_string(),
        }
    }

    fn single_bond_node(mode: &str) -> BTreeMap<String, NodeTopology> {
        let bond = Bond {
            mode: mode.to_string(),
            mac_address: "aa".to_string(),
            ports: [("eth0".to_string(), nic("eth0", "aa:00"))].into(),
        };
        let topology = NodeTopology {
            bonds: [("tenant-bond".to_string(), bond)].into(),
            sriov_pools: BTreeMap::new(),
        };
        [("n1".to_string(), topology)].into()
    }

    #[tokio::test]
    async fn test_attach_posts_fabric_objects_in_order() {
        let (client, fabric, store) = connected().await;
        let mut provider = FssVlanProvider::from_client(client);
        let nodes = single_bond_node("active-backup");
        let status = provider
            .attach("projA", "subX", "100", &nodes, NadAction::CreateAttach)
            .await
            .unwrap();
        assert!(status.values().all(Option::is_none));
        provider.txn_done().await;

        let state = fabric.state.lock().unwrap();
        let posts: Vec<&str> = state
            .log
            .iter()
            .filter(|(method, _)| *method == "POST")
            .map(|(_, path)| path.as_str())
            .skip(2) // plugin + deployment registration
            .collect();
        assert_eq!(
            posts,
            vec![
                paths::TENANTS,
                paths::SUBNETS,
                paths::HOST_PORT_LABELS,
                paths::HOST_PORTS,
                paths::HOST_PORT_ASSOCIATIONS,
                paths::SUBNET_ASSOCIATIONS,
            ]
        );
        drop(state);

        let mirror = Database::decode(&store.key(DATABASE_KEY)).unwrap();
        assert_eq!(mirror.tenants.len(), 1);
        assert_eq!(mirror.subnets.len(), 1);
        let subnet_id = mirror.subnets.keys().next().unwrap();
        assert!(mirror.host_port_labels[subnet_id].contains_key(&Vlan::Tagged(100)));
        assert!(mirror.attached_labels[subnet_id].contains_key(&Vlan::Tagged(100)));
        assert_eq!(mirror.host_ports["n1"].len(), 1);
        assert_eq!(mirror.attached_ports.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_detach_collapses_the_whole_chain() {
        let (client, fabric, store) = connected().await;
        let mut provider = FssVlanProvider::from_client(client);
        let nodes = single_bond_node("active-backup");
        provider
            .attach("projA", "subX", "100", &nodes, NadAction::CreateAttach)
            .await
            .unwrap();
        provider.txn_done().await;

        provider
            .detach("projA", "subX", "100", &nodes, NadAction::DeleteDetach)
            .await
            .unwrap();
        provider.txn_done().await;

        let state = fabric.state.lock().unwrap();
        let deletes: Vec<&str> = state
            .log
            .iter()
            .filter(|(method, _)| *method == "DELETE")
            .map(|(_, path)| path.as_str())
            .collect();
        assert_eq!(deletes.len(), 3);
        assert!(deletes[0].starts_with(paths::HOST_PORT_LABELS));
        assert!(deletes[1].starts_with(paths::SUBNETS));
        assert!(deletes[2].starts_with(paths::TENANTS));
        drop(state);

        let mirror = Database::decode(&store.key(DATABASE_KEY)).unwrap();
        assert!(mirror.tenants.is_empty());
        assert!(mirror.subnets.is_empty());
        assert!(mirror.attached_labels.is_empty());
    }

    #[tokio::test]
    async fn test_lag_bond_attaches_the_parent_port() {
        let (client, fabric, _store) = connected().await;
        let mut provider = FssVlanProvider::from_client(client);
        let mut nodes = single_bond_node("802.3ad");
        nodes
            .get_mut("n1")
            .unwrap()
            .bonds
            .get_mut("tenant-bond")
            .unwrap()
            .ports
            .insert("eth1".to_string(), nic("eth1", "aa:01"));
        let status = provider
            .attach("projA", "subX", "100", &nodes, NadAction::CreateAttach)
            .await
            .unwrap();
        assert!(status.values().all(Option::is_none));

        let state = fabric.state.lock().unwrap();
        let parent = state
            .host_ports
            .iter()
            .find(|p| p.is_lag)
            .expect("parent port");
        assert_eq!(parent.port_name, "tenant-bond");
        let slaves: Vec<_> = state.host_ports.iter().filter(|p| !p.is_lag).collect();
        assert_eq!(slaves.len(), 2);
        for slave in slaves {
            assert_eq!(slave.parent_host_port_id, parent.id);
        }
        // Only the parent is attached to the label.
        assert_eq!(state.port_associations.len(), 1);
        assert_eq!(state.port_associations[0].host_port_id, parent.id);
    }

    #[tokio::test]
    async fn test_attach_spans_the_whole_vlan_range() {
        let (client, fabric, _store) = connected().await;
        let mut provider = FssVlanProvider::from_client(client);
        let nodes = single_bond_node("active-backup");
        provider
            .attach("projA", "subX", "100-102", &nodes, NadAction::CreateAttach)
            .await
            .unwrap();
        let state = fabric.state.lock().unwrap();
        assert_eq!(state.labels.len(), 3);
        assert_eq!(state.subnet_associations.len(), 3);
        // One host port, attached to each label.
        assert_eq!(state.host_ports.len(), 1);
        assert_eq!(state.port_associations.len(), 3);
    }

    #[tokio::test]
    async fn test_node_attach_skips_the_subnet_association() {
        let (client, fabric, _store) = connected().await;
        let mut provider = FssVlanProvider::from_client(client);
        let nodes = single_bond_node("active-backup");
        provider
            .attach("projA", "subX", "100", &nodes, NadAction::NodeAttach)
            .await
            .unwrap();
        assert!(fabric.state.lock().unwrap().subnet_associations.is_empty());
    }

    #[tokio::test]
    async fn test_node_detach_removes_ports_but_keeps_the_label() {
        let (client, fabric, _store) = connected().await;
        let mut provider = FssVlanProvider::from_client(client);
        let nodes = single_bond_node("active-backup");
        provider
            .attach("projA", "subX", "100", &nodes, NadAction::CreateAttach)
            .await
            .unwrap();
        let status = provider
            .detach("projA", "subX", "100", &nodes, NadAction::NodeDetach)
            .await
            .unwrap();
        assert!(status.values().all(Option::is_none));
        let state = fabric.state.lock().unwrap();
        assert!(state.port_associations.is_empty());
        assert_eq!(state.labels.len(), 1);
        assert_eq!(state.subnet_associations.len(), 1);
    }

    #[tokio::test]
    async fn test_detach_of_unknown_vlan_is_an_error() {
        let (client, _fabric, _store) = connected().await;
        let mut provider = FssVlanProvider::from_client(client);
        let err = provider
            .detach(
                "projA",
                "subX",
                "100",
                &BTreeMap::new(),
                NadAction::DeleteDetach,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FssError::UnknownVlan(100)));
    }

    #[tokio::test]
    async fn test_invalid_vlan_range_is_a_global_error() {
        let (client, _fabric, _store) = connected().await;
        let mut provider = FssVlanProvider::from_client(client);
        let err = provider
            .attach(
                "projA",
                "subX",
                "0-10",
                &BTreeMap::new(),
                NadAction::CreateAttach,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FssError::VlanRange(_)));
    }

    #[tokio::test]
    async fn test_unconnected_provider_refuses_work() {
        let mut provider = FssVlanProvider::new("/nonexistent/fss.conf");
        let err = provider
            .attach(
                "projA",
                "subX",
                "100",
                &BTreeMap::new(),
                NadAction::CreateAttach,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FssError::NotConnected));
    }
}
