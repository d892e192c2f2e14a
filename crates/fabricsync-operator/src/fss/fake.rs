//! In-memory fabric and mirror store used by engine tests.
//!
//! The fake fabric assigns ids, keeps the object graph, applies the
//! server-side cascades the engine relies on, and records every request
//! so tests can assert ordering.

use super::error::FssError;
use super::model::{
    Deployment, HostPort, HostPortAssociation, HostPortLabel, Plugin, Subnet, SubnetAssociation,
    Tenant,
};
use super::store::{MirrorStore, DATABASE_KEY, DEPLOYMENT_KEY, PLUGIN_KEY};
use super::transport::{paths, FssTransport};
use super::FssClient;
use crate::config::AuthOpts;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub(crate) fn test_opts() -> AuthOpts {
    AuthOpts {
        auth_url: "https://fss.test/rest/auth/login".to_string(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        cluster_name: "test".to_string(),
        restart_mode: "resync".to_string(),
        region_id: "region-a".to_string(),
        insecure: false,
    }
}

/// Connects a fresh client against a fresh fabric and store.
pub(crate) async fn connected() -> (FssClient, FakeFabric, MemoryStore) {
    let fabric = FakeFabric::default();
    let store = MemoryStore::default();
    let client = FssClient::connect(
        Box::new(fabric.clone()),
        Box::new(store.clone()),
        &test_opts(),
    )
    .await
    .expect("connect against fake fabric");
    (client, fabric, store)
}

#[derive(Default)]
pub(crate) struct FabricState {
    next_id: u64,
    pub log: Vec<(&'static str, String)>,
    pub plugins: Vec<Plugin>,
    pub deployments: Vec<Deployment>,
    pub tenants: Vec<Tenant>,
    pub subnets: Vec<Subnet>,
    pub labels: Vec<HostPortLabel>,
    pub host_ports: Vec<HostPort>,
    pub subnet_associations: Vec<SubnetAssociation>,
    pub port_associations: Vec<HostPortAssociation>,
}

impl FabricState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    fn delete(&mut self, collection: &str, id: &str) -> bool {
        match collection {
            paths::HOST_PORT_LABELS => {
                let before = self.labels.len();
                self.labels.retain(|label| label.id != id);
                // Cascade: the label's associations go with it.
                self.subnet_associations
                    .retain(|a| a.host_port_label_id != id);
                self.port_associations
                    .retain(|a| a.host_port_label_id != id);
                self.labels.len() != before
            }
            paths::HOST_PORTS => {
                let before = self.host_ports.len();
                self.host_ports.retain(|port| port.id != id);
                self.port_associations.retain(|a| a.host_port_id != id);
                self.host_ports.len() != before
            }
            paths::SUBNETS => {
                let before = self.subnets.len();
                self.subnets.retain(|subnet| subnet.id != id);
                self.subnet_associations.retain(|a| a.subnet_id != id);
                self.subnets.len() != before
            }
            paths::TENANTS => {
                let Some(position) = self.tenants.iter().position(|t| t.id == id) else {
                    return false;
                };
                self.tenants.remove(position);
                // Cascade: the tenant's subnets go with it.
                let subnet_ids: Vec<String> = self
                    .subnets
                    .iter()
                    .filter(|s| s.tenant_id == id)
                    .map(|s| s.id.clone())
                    .collect();
                for subnet_id in subnet_ids {
                    self.delete(paths::SUBNETS, &subnet_id);
                }
                true
            }
            paths::HOST_PORT_ASSOCIATIONS => {
                let before = self.port_associations.len();
                self.port_associations.retain(|a| a.id != id);
                self.port_associations.len() != before
            }
            paths::SUBNET_ASSOCIATIONS => {
                let before = self.subnet_associations.len();
                self.subnet_associations.retain(|a| a.id != id);
                self.subnet_associations.len() != before
            }
            paths::DEPLOYMENTS => {
                let before = self.deployments.len();
                self.deployments.retain(|d| d.id != id);
                self.deployments.len() != before
            }
            _ => false,
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeFabric {
    pub state: Arc<Mutex<FabricState>>,
}

#[async_trait]
impl FssTransport for FakeFabric {
    async fn get(&mut self, path: &str) -> Result<(u16, Vec<u8>), FssError> {
        let state = &mut *self.state.lock().unwrap();
        state.log.push(("GET", path.to_string()));
        let response = match path {
            paths::DEPLOYMENTS => (200, serde_json::to_vec(&state.deployments)?),
            paths::TENANTS => (200, serde_json::to_vec(&state.tenants)?),
            paths::SUBNETS => (200, serde_json::to_vec(&state.subnets)?),
            paths::HOST_PORT_LABELS => (200, serde_json::to_vec(&state.labels)?),
            paths::HOST_PORTS => (200, serde_json::to_vec(&state.host_ports)?),
            _ => {
                if let Some(id) = path.strip_prefix(paths::PLUGINS).and_then(|r| r.strip_prefix('/')) {
                    match state.plugins.iter().find(|p| p.id == id) {
                        Some(plugin) => (200, serde_json::to_vec(plugin)?),
                        None => (404, Vec::new()),
                    }
                } else if let Some(id) =
                    path.strip_prefix(paths::DEPLOYMENTS).and_then(|r| r.strip_prefix('/'))
                {
                    match state.deployments.iter().find(|d| d.id == id) {
                        Some(deployment) => (200, serde_json::to_vec(deployment)?),
                        None => (404, Vec::new()),
                    }
                } else {
                    (404, Vec::new())
                }
            }
        };
        Ok(response)
    }

    async fn post(&mut self, path: &str, body: Vec<u8>) -> Result<(u16, Vec<u8>), FssError> {
        let state = &mut *self.state.lock().unwrap();
        state.log.push(("POST", path.to_string()));
        let response = match path {
            paths::PLUGINS => {
                let mut plugin: Plugin = serde_json::from_slice(&body)?;
                plugin.id = state.next("PL");
                state.plugins.push(plugin.clone());
                serde_json::to_vec(&plugin)?
            }
            paths::DEPLOYMENTS => {
                let mut deployment: Deployment = serde_json::from_slice(&body)?;
                deployment.id = state.next("D");
                // Spare tests the 10 s adminUp poll.
                deployment.admin_up = true;
                state.deployments.push(deployment.clone());
                serde_json::to_vec(&deployment)?
            }
            paths::TENANTS => {
                let mut tenant: Tenant = serde_json::from_slice(&body)?;
                tenant.id = state.next("T");
                tenant.fss_workload_evpn_id = state.next("W");
                state.tenants.push(tenant.clone());
                serde_json::to_vec(&tenant)?
            }
            paths::SUBNETS => {
                let mut subnet: Subnet = serde_json::from_slice(&body)?;
                subnet.id = state.next("S");
                subnet.fss_subnet_id = state.next("N");
                state.subnets.push(subnet.clone());
                serde_json::to_vec(&subnet)?
            }
            paths::HOST_PORT_LABELS => {
                let mut label: HostPortLabel = serde_json::from_slice(&body)?;
                label.id = state.next("L");
                state.labels.push(label.clone());
                serde_json::to_vec(&label)?
            }
            paths::HOST_PORTS => {
                let mut port: HostPort = serde_json::from_slice(&body)?;
                port.id = state.next("P");
                state.host_ports.push(port.clone());
                serde_json::to_vec(&port)?
            }
            paths::SUBNET_ASSOCIATIONS => {
                let mut association: SubnetAssociation = serde_json::from_slice(&body)?;
                association.id = state.next("SA");
                state.subnet_associations.push(association.clone());
                serde_json::to_vec(&association)?
            }
            paths::HOST_PORT_ASSOCIATIONS => {
                let mut association: HostPortAssociation = serde_json::from_slice(&body)?;
                association.id = state.next("PA");
                state.port_associations.push(association.clone());
                serde_json::to_vec(&association)?
            }
            _ => return Ok((404, Vec::new())),
        };
        Ok((201, response))
    }

    async fn delete(&mut self, path: &str) -> Result<(u16, Vec<u8>), FssError> {
        let state = &mut *self.state.lock().unwrap();
        state.log.push(("DELETE", path.to_string()));
        let Some((collection, id)) = path.rsplit_once('/') else {
            return Ok((404, Vec::new()));
        };
        if state.delete(collection, id) {
            Ok((204, Vec::new()))
        } else {
            Ok((404, Vec::new()))
        }
    }
}

/// [`MirrorStore`] kept in memory; `None` models a missing ConfigMap.
#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    pub state: Arc<Mutex<Option<BTreeMap<String, String>>>>,
}

impl MemoryStore {
    pub fn key(&self, key: &str) -> String {
        self.state
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|data| data.get(key))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MirrorStore for MemoryStore {
    async fn load(&self) -> Result<Option<BTreeMap<String, String>>, FssError> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn create(&self) -> Result<(), FssError> {
        *self.state.lock().unwrap() = Some(
            [PLUGIN_KEY, DEPLOYMENT_KEY, DATABASE_KEY]
                .into_iter()
                .map(|key| (key.to_string(), String::new()))
                .collect(),
        );
        Ok(())
    }

    async fn save(&self, key: &str, value: String) -> Result<(), FssError> {
        self.state
            .lock()
            .unwrap()
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value);
        Ok(())
    }
}
