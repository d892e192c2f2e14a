//! Fabric client: registration bootstrap and the fabric object engine.
//!
//! One `FssClient` owns the transport, the durable mirror and the
//! registration records. The engine operations mutate the mirror in
//! memory; callers batch per NAD event and persist with [`FssClient::txn_done`].

use super::database::Database;
use super::error::FssError;
use super::model::{
    Deployment, ErrorResponse, HostPort, HostPortAssociation, HostPortLabel, Plugin, Subnet,
    SubnetAssociation, Tenant, Vlan,
};
use super::store::{MirrorStore, CONFIGMAP_NAME, DATABASE_KEY, DEPLOYMENT_KEY, PLUGIN_KEY};
use super::transport::{paths, FssTransport};
use crate::config::AuthOpts;
use fabricsync_core::nad::NadAction;
use fabricsync_core::topology::Nic;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{error, info, warn};

const ADMIN_UP_POLL: Duration = Duration::from_secs(10);

/// Mirror lookup result for one `(workload, subnet, vlan)` triple.
///
/// Levels fill in from the top: a missing subnet still reports the
/// workload EVPN id, a missing label still reports both parents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelLookup {
    pub workload_evpn_id: Option<String>,
    pub subnet_id: Option<String>,
    pub label_id: Option<String>,
}

impl LabelLookup {
    pub fn exists(&self) -> bool {
        self.label_id.is_some()
    }
}

/// Client for one fabric deployment.
pub struct FssClient {
    pub(crate) transport: Box<dyn FssTransport>,
    pub(crate) store: Box<dyn MirrorStore>,
    pub(crate) cluster_name: String,
    pub(crate) plugin: Plugin,
    pub(crate) deployment: Deployment,
    pub(crate) database: Database,
}

impl FssClient {
    /// Registers (or re-validates) the plugin and deployment with the
    /// fabric, loads the mirror, blocks until the deployment is marked
    /// administratively up, and resyncs when so configured.
    pub async fn connect(
        transport: Box<dyn FssTransport>,
        store: Box<dyn MirrorStore>,
        cfg: &AuthOpts,
    ) -> Result<Self, FssError> {
        let mut client = Self {
            transport,
            store,
            cluster_name: cfg.cluster_name.clone(),
            plugin: Plugin::default(),
            deployment: Deployment::default(),
            database: Database::default(),
        };
        let registration_name = format!("ncs-{}", cfg.cluster_name);

        let mut first_run = false;
        let mut has_deployment = false;
        let stored = match client.store.load().await? {
            Some(data) => data,
            None => {
                info!("creating configmap {CONFIGMAP_NAME}");
                client.store.create().await?;
                first_run = true;
                BTreeMap::new()
            }
        };

        if !first_run {
            let plugin = stored
                .get(PLUGIN_KEY)
                .and_then(|raw| serde_json::from_str::<Plugin>(raw).ok())
                .filter(|plugin| !plugin.id.is_empty());
            match plugin {
                Some(plugin) => {
                    let path = format!("{}/{}", paths::PLUGINS, plugin.id);
                    let (status, _) = client.transport.get(&path).await?;
                    if status == 200 {
                        info!(id = %plugin.id, "plugin from last run is still valid");
                        client.plugin = plugin;
                    } else {
                        info!(id = %plugin.id, "plugin from last run is no longer valid");
                        first_run = true;
                    }
                }
                None => {
                    info!("no plugin found from last run");
                    first_run = true;
                }
            }
        }
        if !first_run {
            let deployment = stored
                .get(DEPLOYMENT_KEY)
                .and_then(|raw| serde_json::from_str::<Deployment>(raw).ok())
                .filter(|deployment| deployment.plugin_id == client.plugin.id);
            match deployment {
                Some(deployment) => {
                    let path = format!("{}/{}", paths::DEPLOYMENTS, deployment.id);
                    let (status, _) = client.transport.get(&path).await?;
                    if status == 200 {
                        info!(id = %deployment.id, "deployment from last run is still valid");
                        has_deployment = true;
                        client.deployment = deployment;
                    } else {
                        info!(id = %deployment.id, "deployment from last run is no longer valid");
                    }
                }
                None => info!("no deployment found from last run"),
            }
        }

        if first_run {
            info!("starting a new run");
            let plugin = Plugin {
                connect_type: "kubernetes".to_string(),
                name: registration_name.clone(),
                supports_new_deployments: false,
                id: String::new(),
            };
            client.plugin = client
                .post_created("create plugin", paths::PLUGINS, &plugin)
                .await?;
            info!(id = %client.plugin.id, "plugin created");
            client
                .store
                .save(PLUGIN_KEY, serde_json::to_string(&client.plugin)?)
                .await?;
        }
        if !has_deployment {
            let deployment = Deployment {
                admin_up: false,
                name: registration_name,
                plugin_id: client.plugin.id.clone(),
                region_id: cfg.region_id.clone(),
                ..Deployment::default()
            };
            client.deployment = client
                .post_created("create deployment", paths::DEPLOYMENTS, &deployment)
                .await?;
            info!(id = %client.deployment.id, "deployment created");
            client
                .store
                .save(DEPLOYMENT_KEY, serde_json::to_string(&client.deployment)?)
                .await?;
        }

        if !client.deployment.admin_up {
            info!(
                plugin = %client.plugin.id,
                deployment = %client.deployment.id,
                "waiting for the deployment to be set adminUp"
            );
            let path = format!("{}/{}", paths::DEPLOYMENTS, client.deployment.id);
            while !client.deployment.admin_up {
                tokio::time::sleep(ADMIN_UP_POLL).await;
                let (status, body) = client.transport.get(&path).await?;
                if status != 200 {
                    return Err(FssError::api("get deployment", status));
                }
                client.deployment = serde_json::from_slice(&body)?;
            }
            info!(id = %client.deployment.id, "deployment is ready");
            client
                .store
                .save(DEPLOYMENT_KEY, serde_json::to_string(&client.deployment)?)
                .await?;
        }

        if first_run {
            client.txn_done().await;
        } else if let Some(raw) = stored.get(DATABASE_KEY).filter(|raw| !raw.is_empty()) {
            match Database::decode(raw) {
                Ok(database) => client.database = database,
                Err(e) => error!(error = %e, "mirror decoding error"),
            }
        }

        if cfg.restart_mode == "resync" {
            info!("resyncing tenant data with the server");
            let deployment_id = client.deployment.id.clone();
            if let Err(e) = client.resync(first_run, &deployment_id).await {
                warn!(error = %e, "resync with server failed");
            }
        }
        Ok(client)
    }

    /// Persists the mirror; marks the end of one NAD transaction.
    pub async fn txn_done(&mut self) {
        match self.database.encode() {
            Ok(encoded) => {
                if let Err(e) = self.store.save(DATABASE_KEY, encoded).await {
                    error!(error = %e, "saving mirror to configmap failed");
                }
            }
            Err(e) => error!(error = %e, "mirror encoding error"),
        }
    }

    /// Ensures tenant, subnet and host port label exist for the triple,
    /// creating whatever is missing, and returns
    /// `(fssSubnetId, hostPortLabelId)`.
    pub async fn create_subnet_interface(
        &mut self,
        workload_evpn_name: &str,
        subnet_name: &str,
        vlan_id: u16,
    ) -> Result<(String, String), FssError> {
        let workload_evpn_id = match self.database.workload_id(workload_evpn_name) {
            Some(id) => id,
            None => {
                info!(workload = workload_evpn_name, "creating tenant");
                let tenant = Tenant {
                    deployment_id: self.deployment.id.clone(),
                    fss_workload_evpn_name: workload_evpn_name.to_string(),
                    name: format!("tenant-{workload_evpn_name}"),
                    fss_managed: true,
                    ..Tenant::default()
                };
                let tenant: Tenant = self
                    .post_created("create tenant", paths::TENANTS, &tenant)
                    .await?;
                info!(id = %tenant.id, evpn = %tenant.fss_workload_evpn_id, "tenant created");
                let id = tenant.fss_workload_evpn_id.clone();
                self.database.insert_tenant(tenant);
                id
            }
        };

        let fss_subnet_id = match self.database.subnet_id(&workload_evpn_id, subnet_name) {
            Some(id) => id,
            None => {
                info!(subnet = subnet_name, "creating subnet");
                let subnet = Subnet {
                    deployment_id: self.deployment.id.clone(),
                    tenant_id: self
                        .database
                        .tenants
                        .get(&workload_evpn_id)
                        .map(|tenant| tenant.id.clone())
                        .unwrap_or_default(),
                    fss_subnet_name: subnet_name.to_string(),
                    name: format!("subnet-{subnet_name}"),
                    fss_managed: true,
                    ..Subnet::default()
                };
                let subnet: Subnet = self
                    .post_created("create subnet", paths::SUBNETS, &subnet)
                    .await?;
                info!(id = %subnet.id, fss_subnet = %subnet.fss_subnet_id, "subnet created");
                let id = subnet.fss_subnet_id.clone();
                self.database.insert_subnet(&workload_evpn_id, subnet);
                id
            }
        };

        let vlan = Vlan::from_id(vlan_id);
        if let Some(label_id) = self.database.label(&fss_subnet_id, vlan) {
            return Ok((fss_subnet_id, label_id));
        }
        info!(subnet = %fss_subnet_id, vlan = vlan_id, "creating host port label");
        let label = HostPortLabel {
            deployment_id: self.deployment.id.clone(),
            name: format!("label-{fss_subnet_id}-{vlan_id}"),
            ..HostPortLabel::default()
        };
        let label: HostPortLabel = self
            .post_created("create hostPortLabel", paths::HOST_PORT_LABELS, &label)
            .await?;
        info!(id = %label.id, "host port label created");
        self.database
            .insert_label(&fss_subnet_id, vlan, label.id.clone());
        Ok((fss_subnet_id, label.id))
    }

    /// Pure mirror lookup for the triple; no fabric traffic.
    pub fn get_subnet_interface(
        &self,
        workload_evpn_name: &str,
        subnet_name: &str,
        vlan_id: u16,
    ) -> LabelLookup {
        let mut lookup = LabelLookup::default();
        let Some(workload_evpn_id) = self.database.workload_id(workload_evpn_name) else {
            return lookup;
        };
        lookup.workload_evpn_id = Some(workload_evpn_id.clone());
        let Some(subnet_id) = self.database.subnet_id(&workload_evpn_id, subnet_name) else {
            return lookup;
        };
        lookup.label_id = self.database.label(&subnet_id, Vlan::from_id(vlan_id));
        lookup.subnet_id = Some(subnet_id);
        lookup
    }

    /// Attaches a host port label to its subnet with the VLAN
    /// descriptor; idempotent against the mirror.
    pub async fn attach_subnet_interface(
        &mut self,
        fss_subnet_id: &str,
        vlan_id: u16,
        host_port_label_id: &str,
    ) -> Result<(), FssError> {
        let vlan = Vlan::from_id(vlan_id);
        if self.database.attached_label(fss_subnet_id, vlan).as_deref()
            == Some(host_port_label_id)
        {
            info!(label = host_port_label_id, "host port label already attached");
            return Ok(());
        }
        info!(
            label = host_port_label_id,
            subnet = fss_subnet_id,
            vlan = vlan_id,
            "attaching host port label to subnet"
        );
        let association = SubnetAssociation {
            deployment_id: self.deployment.id.clone(),
            host_port_label_id: host_port_label_id.to_string(),
            subnet_id: self
                .database
                .subnets
                .get(fss_subnet_id)
                .map(|subnet| subnet.id.clone())
                .unwrap_or_default(),
            vlan_type: vlan.vlan_type().to_string(),
            vlan_value: vlan.vlan_value(),
            ..SubnetAssociation::default()
        };
        let association: SubnetAssociation = self
            .post_created(
                "create subnetAssociation",
                paths::SUBNET_ASSOCIATIONS,
                &association,
            )
            .await?;
        info!(id = %association.id, "subnet association created");
        self.database
            .mark_attached(fss_subnet_id, vlan, association.host_port_label_id);
        Ok(())
    }

    /// Deletes the host port label; the server cascades away its subnet
    /// and host port associations. On `DeleteDetach`, an emptied subnet
    /// collapses upward, then an emptied tenant.
    pub async fn delete_subnet_interface(
        &mut self,
        workload_evpn_id: &str,
        fss_subnet_id: &str,
        vlan_id: u16,
        host_port_label_id: &str,
        request_type: NadAction,
    ) -> Result<(), FssError> {
        info!(
            label = host_port_label_id,
            subnet = fss_subnet_id,
            vlan = vlan_id,
            "deleting host port label"
        );
        let vlan = Vlan::from_id(vlan_id);
        let mut result = Ok(());
        if self.database.attached_label(fss_subnet_id, vlan).as_deref()
            == Some(host_port_label_id)
        {
            let path = format!("{}/{}", paths::HOST_PORT_LABELS, host_port_label_id);
            let (status, _) = self.transport.delete(&path).await?;
            if status == 204 {
                info!(label = host_port_label_id, "host port label deleted");
            } else {
                result = Err(FssError::api("delete hostPortLabel", status));
            }
        } else {
            info!(label = host_port_label_id, "host port label is not attached");
        }
        // Local cleanup happens even on an odd server answer: the
        // cascade has almost certainly run, and a ghost here would
        // block future creates. Resync compensates otherwise.
        self.database
            .remove_label(fss_subnet_id, vlan, host_port_label_id);

        if request_type == NadAction::DeleteDetach
            && self.database.attached_labels_empty(fss_subnet_id)
        {
            if let Some(subnet) = self.database.subnets.get(fss_subnet_id).cloned() {
                if let Err(e) = self
                    .delete_object("delete subnet", paths::SUBNETS, &subnet.id)
                    .await
                {
                    error!(error = %e, subnet = %subnet.id, "delete subnet failed");
                }
                info!(subnet = %subnet.id, "subnet deleted");
                self.database.remove_subnet(workload_evpn_id, fss_subnet_id);
            }
            if self.database.subnet_mapping_empty(workload_evpn_id) {
                if let Some(tenant) = self.database.tenants.get(workload_evpn_id).cloned() {
                    if let Err(e) = self
                        .delete_object("delete tenant", paths::TENANTS, &tenant.id)
                        .await
                    {
                        error!(error = %e, tenant = %tenant.id, "delete tenant failed");
                    }
                    info!(tenant = %tenant.id, "tenant deleted");
                    self.database.remove_tenant(workload_evpn_id);
                }
            }
        }
        result
    }

    /// Creates one host port unless the mirror already has it.
    ///
    /// LAG parents are created with `is_lag` and no parent; their slaves
    /// follow with `parent_host_port_id` pointing at the parent.
    pub async fn create_host_port(
        &mut self,
        node: &str,
        nic: &Nic,
        is_lag: bool,
        parent_host_port_id: Option<&str>,
    ) -> Result<String, FssError> {
        if let Some(id) = self.database.host_port(node, &nic.name) {
            return Ok(id);
        }
        info!(node, port = %nic.name, is_lag, "creating host port");
        let host_port = HostPort {
            deployment_id: self.deployment.id.clone(),
            host_name: node.to_string(),
            port_name: nic.name.clone(),
            is_lag,
            mac_address: nic.mac_address.clone(),
            parent_host_port_id: parent_host_port_id.unwrap_or_default().to_string(),
            ..HostPort::default()
        };
        let host_port: HostPort = self
            .post_created("create hostPort", paths::HOST_PORTS, &host_port)
            .await?;
        info!(id = %host_port.id, "host port created");
        self.database
            .insert_host_port(node, &nic.name, host_port.id.clone());
        Ok(host_port.id)
    }

    /// Attaches a host port to a label; idempotent against the mirror.
    pub async fn attach_host_port(
        &mut self,
        host_port_label_id: &str,
        node: &str,
        nic: &Nic,
    ) -> Result<(), FssError> {
        let Some(host_port_id) = self.database.host_port(node, &nic.name) else {
            return Err(FssError::MissingHostPort {
                node: node.to_string(),
                port: nic.name.clone(),
            });
        };
        if self.database.is_port_attached(host_port_label_id, &host_port_id) {
            info!(port = %host_port_id, "host port already attached");
            return Ok(());
        }
        info!(label = host_port_label_id, node, port = %nic.name, "attaching host port");
        let association = HostPortAssociation {
            deployment_id: self.deployment.id.clone(),
            host_port_label_id: host_port_label_id.to_string(),
            host_port_id: host_port_id.clone(),
            ..HostPortAssociation::default()
        };
        let association: HostPortAssociation = self
            .post_created(
                "create hostPortAssociation",
                paths::HOST_PORT_ASSOCIATIONS,
                &association,
            )
            .await?;
        info!(id = %association.id, "host port association created");
        self.database
            .push_port_association(host_port_label_id, host_port_id, association.id);
        Ok(())
    }

    /// Detaches a host port from a label; silent when the mirror has no
    /// record of the attachment.
    pub async fn detach_host_port(
        &mut self,
        host_port_label_id: &str,
        node: &str,
        nic: &Nic,
    ) -> Result<(), FssError> {
        let mut result = Ok(());
        if let Some(host_port_id) = self.database.host_port(node, &nic.name) {
            info!(label = host_port_label_id, node, port = %nic.name, "detaching host port");
            let associations = self
                .database
                .take_port_associations(host_port_label_id, &host_port_id);
            for association_id in associations {
                match self
                    .delete_object(
                        "delete hostPortAssociation",
                        paths::HOST_PORT_ASSOCIATIONS,
                        &association_id,
                    )
                    .await
                {
                    Ok(()) => info!(id = %association_id, "host port association deleted"),
                    Err(e) => result = Err(e),
                }
            }
        }
        result
    }

    /// Deletes every host port of a node, non-LAG ports before LAG
    /// parents, and forgets the node.
    ///
    /// LAG entries are recognized by the `"bond"` port-name substring;
    /// the mirror does not carry `is_lag`.
    pub async fn detach_node(&mut self, node_name: &str) {
        let ports = self
            .database
            .host_ports
            .get(node_name)
            .cloned()
            .unwrap_or_default();
        let (lag_ports, plain_ports): (Vec<_>, Vec<_>) = ports
            .into_iter()
            .partition(|(port_name, _)| port_name.contains("bond"));
        for (port_name, host_port_id) in plain_ports.into_iter().chain(lag_ports) {
            info!(node = node_name, port = %port_name, id = %host_port_id, "deleting host port");
            if let Err(e) = self
                .delete_object("delete hostPort", paths::HOST_PORTS, &host_port_id)
                .await
            {
                error!(error = %e, node = node_name, port = %port_name, "delete host port failed");
            }
        }
        self.database.host_ports.remove(node_name);
    }

    pub(crate) async fn post_created<T>(
        &mut self,
        what: &'static str,
        path: &str,
        body: &T,
    ) -> Result<T, FssError>
    where
        T: Serialize + DeserializeOwned,
    {
        let (status, response) = self.transport.post(path, serde_json::to_vec(body)?).await?;
        if status != 201 {
            let detail: ErrorResponse = serde_json::from_slice(&response).unwrap_or_default();
            error!(what, status, title = %detail.title, detail = %detail.detail, "fss create failed");
            return Err(FssError::api(what, status));
        }
        Ok(serde_json::from_slice(&response)?)
    }

    pub(crate) async fn get_list<T: DeserializeOwned>(
        &mut self,
        what: &'static str,
        path: &str,
    ) -> Result<Vec<T>, FssError> {
        let (status, body) = self.transport.get(path).await?;
        if status != 200 {
            return Err(FssError::api(what, status));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    pub(crate) async fn delete_object(
        &mut self,
        what: &'static str,
        path: &str,
        id: &str,
    ) -> Result<(), FssError> {
        let (status, _) = self.transport.delete(&format!("{path}/{id}")).await?;
        if status != 204 {
            return Err(FssError::api(what, status));
        }
        Ok(())
    }
}
