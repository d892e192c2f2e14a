//! Startup resynchronization.
//!
//! Three views can diverge across a crash: the mirror, the fabric
//! server, and leftover deployments sharing this cluster's name. Resync
//! removes the divergence in three phases: a first-run purge of foreign
//! same-named deployments, a mirror shrink to what the server still
//! knows, and a server shrink of objects the mirror never committed.
//!
//! Deleting a host port label cascades away its subnet and host port
//! associations server-side; deleting a tenant cascades away its
//! subnets. Non-LAG host ports are always deleted before LAG parents
//! because slaves reference their parent.

use super::error::FssError;
use super::model::{Deployment, HostPort, HostPortLabel, Subnet, Tenant};
use super::transport::paths;
use super::FssClient;
use tracing::{error, info, warn};

impl FssClient {
    /// Runs after bootstrap when `restart-mode = resync`. Failures are
    /// reported but never abort startup.
    pub(crate) async fn resync(
        &mut self,
        first_run: bool,
        deployment_id: &str,
    ) -> Result<(), FssError> {
        if first_run {
            return self.purge_stale_deployments(deployment_id).await;
        }
        self.shrink_mirror(deployment_id).await?;
        self.purge_unknown_server_objects(deployment_id).await
    }

    /// Phase A: on a first run, delete everything owned by other
    /// deployments registered under this cluster's name.
    async fn purge_stale_deployments(&mut self, deployment_id: &str) -> Result<(), FssError> {
        let deployment_name = format!("ncs-{}", self.cluster_name);
        let deployments: Vec<Deployment> =
            self.get_list("get deployments", paths::DEPLOYMENTS).await?;
        for stale in deployments
            .into_iter()
            .filter(|d| d.name == deployment_name && d.id != deployment_id)
        {
            info!(deployment = %stale.id, "purging stale deployment data");

            let labels: Vec<HostPortLabel> = self
                .get_list("get hostPortLabels", paths::HOST_PORT_LABELS)
                .await?;
            for label in labels.iter().filter(|l| l.deployment_id == stale.id) {
                if let Err(e) = self
                    .delete_object("delete hostPortLabel", paths::HOST_PORT_LABELS, &label.id)
                    .await
                {
                    error!(error = %e, label = %label.id, "delete stale hostPortLabel failed");
                }
            }

            let host_ports: Vec<HostPort> =
                self.get_list("get hostPorts", paths::HOST_PORTS).await?;
            let (lag_ports, plain_ports): (Vec<_>, Vec<_>) = host_ports
                .into_iter()
                .filter(|p| p.deployment_id == stale.id)
                .partition(|p| p.is_lag);
            for port in plain_ports.into_iter().chain(lag_ports) {
                if let Err(e) = self
                    .delete_object("delete hostPort", paths::HOST_PORTS, &port.id)
                    .await
                {
                    error!(
                        error = %e,
                        host = %port.host_name,
                        port = %port.port_name,
                        "delete stale hostPort failed"
                    );
                }
            }

            let tenants: Vec<Tenant> = self.get_list("get tenants", paths::TENANTS).await?;
            for tenant in tenants.iter().filter(|t| t.deployment_id == stale.id) {
                if let Err(e) = self
                    .delete_object("delete tenant", paths::TENANTS, &tenant.id)
                    .await
                {
                    error!(error = %e, tenant = %tenant.id, "delete stale tenant failed");
                }
            }
        }
        Ok(())
    }

    /// Phase B: drop mirror entries the server no longer knows, together
    /// with their dependent tables, then persist the shrunk mirror.
    async fn shrink_mirror(&mut self, deployment_id: &str) -> Result<(), FssError> {
        let server_tenants: Vec<Tenant> = self.get_list("get tenants", paths::TENANTS).await?;
        let stale_tenants: Vec<String> = self
            .database
            .tenants
            .iter()
            .filter(|(evpn_id, tenant)| {
                tenant.deployment_id == deployment_id
                    && !server_tenants
                        .iter()
                        .any(|server| &server.fss_workload_evpn_id == *evpn_id)
            })
            .map(|(evpn_id, _)| evpn_id.clone())
            .collect();
        for evpn_id in stale_tenants {
            warn!(evpn = %evpn_id, "dropping unknown tenant from the mirror");
            self.database.remove_tenant(&evpn_id);
            // Hanging subnets fall out in the next step.
        }

        let server_subnets: Vec<Subnet> = self.get_list("get subnets", paths::SUBNETS).await?;
        let stale_subnets: Vec<String> = self
            .database
            .subnets
            .iter()
            .filter(|(subnet_id, subnet)| {
                subnet.deployment_id == deployment_id
                    && !server_subnets
                        .iter()
                        .any(|server| &server.fss_subnet_id == *subnet_id)
            })
            .map(|(subnet_id, _)| subnet_id.clone())
            .collect();
        for subnet_id in stale_subnets {
            warn!(subnet = %subnet_id, "dropping unknown subnet from the mirror");
            self.database.subnets.remove(&subnet_id);
            self.database.attached_labels.remove(&subnet_id);
            if let Some(labels) = self.database.host_port_labels.remove(&subnet_id) {
                for label_id in labels.values() {
                    self.database.attached_ports.remove(label_id);
                }
            }
        }

        self.txn_done().await;
        Ok(())
    }

    /// Phase C: delete server objects of this deployment the mirror
    /// never committed; labels first, then host ports (non-LAG before
    /// LAG), then tenants.
    async fn purge_unknown_server_objects(&mut self, deployment_id: &str) -> Result<(), FssError> {
        let labels: Vec<HostPortLabel> = self
            .get_list("get hostPortLabels", paths::HOST_PORT_LABELS)
            .await?;
        let unknown_labels: Vec<String> = labels
            .into_iter()
            .filter(|l| l.deployment_id == deployment_id && !self.database.knows_label(&l.id))
            .map(|l| l.id)
            .collect();
        for label_id in unknown_labels {
            warn!(label = %label_id, "deleting unknown hostPortLabel on the server");
            if let Err(e) = self
                .delete_object("delete hostPortLabel", paths::HOST_PORT_LABELS, &label_id)
                .await
            {
                error!(error = %e, label = %label_id, "delete hostPortLabel failed");
            }
        }

        let host_ports: Vec<HostPort> =
            self.get_list("get hostPorts", paths::HOST_PORTS).await?;
        let (lag_ports, plain_ports): (Vec<_>, Vec<_>) = host_ports
            .into_iter()
            .filter(|p| p.deployment_id == deployment_id && !self.database.knows_host_port(&p.id))
            .partition(|p| p.is_lag);
        for port in plain_ports.into_iter().chain(lag_ports) {
            warn!(host = %port.host_name, port = %port.port_name, "deleting unknown hostPort on the server");
            if let Err(e) = self
                .delete_object("delete hostPort", paths::HOST_PORTS, &port.id)
                .await
            {
                error!(error = %e, port = %port.id, "delete hostPort failed");
            }
        }

        let tenants: Vec<Tenant> = self.get_list("get tenants", paths::TENANTS).await?;
        let unknown_tenants: Vec<String> = tenants
            .into_iter()
            .filter(|t| {
                t.deployment_id == deployment_id
                    && !self.database.tenants.values().any(|known| known.id == t.id)
            })
            .map(|t| t.id)
            .collect();
        for tenant_id in unknown_tenants {
            warn!(tenant = %tenant_id, "deleting unknown tenant on the server");
            if let Err(e) = self
                .delete_object("delete tenant", paths::TENANTS, &tenant_id)
                .await
            {
                error!(error = %e, tenant = %tenant_id, "delete tenant failed");
            }
        }
        Ok(())
    }
}
