//! NetworkAttachmentDefinition controller

use super::{Context, ObservedNad};
use crate::crds::{fabric_targets, NetworkAttachmentDefinition};
use crate::fss::FssError;
use crate::provider::NodesStatus;
use fabricsync_core::nad::{
    self, Annotations, NadAction, NadError, NetConf, NETWORK_TOPOLOGY_KEY, NODE_SELECTOR_KEY,
};
use fabricsync_core::topology::NodeTopology;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{Api, ListParams},
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Error as FinalizerError, Event},
        watcher::Config,
    },
    Client, ResourceExt,
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

const FINALIZER: &str = "fss.nokia.com/topology-finalizer";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
    #[error("nad classification error: {0}")]
    Nad(#[from] NadError),
    #[error("fabric error: {0}")]
    Fss(#[from] FssError),
}

pub struct NadController;

impl NadController {
    pub async fn run(client: Client, ctx: Arc<Context>) {
        let api: Api<NetworkAttachmentDefinition> = Api::all(client);

        Controller::new(api, Config::default())
            .run(
                |nad, ctx| async move { reconcile(nad, ctx).await },
                error_policy,
                ctx,
            )
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => info!(name = %obj.name, "reconciled NetworkAttachmentDefinition"),
                    Err(e) => error!(error = %e, "reconcile error"),
                }
            })
            .await;
    }
}

#[instrument(skip(ctx), fields(name = %nad.name_any()))]
async fn reconcile(
    nad: Arc<NetworkAttachmentDefinition>,
    ctx: Arc<Context>,
) -> Result<Action, FinalizerError<ReconcileError>> {
    let namespace = nad.namespace().unwrap_or_default();
    let api: Api<NetworkAttachmentDefinition> =
        Api::namespaced(ctx.client.clone(), &namespace);
    let ctx = ctx.clone();

    finalizer(&api, FINALIZER, nad, |event| async move {
        match event {
            Event::Apply(nad) => apply(&nad, &ctx).await,
            Event::Cleanup(nad) => cleanup(&nad, &ctx).await,
        }
    })
    .await
}

fn error_policy(
    _nad: Arc<NetworkAttachmentDefinition>,
    error: &FinalizerError<ReconcileError>,
    _ctx: Arc<Context>,
) -> Action {
    error!(error = %error, "reconcile failed");
    Action::requeue(Duration::from_secs(60))
}

fn nad_key(nad: &NetworkAttachmentDefinition) -> String {
    format!("{}/{}", nad.namespace().unwrap_or_default(), nad.name_any())
}

async fn apply(
    nad: &NetworkAttachmentDefinition,
    ctx: &Context,
) -> Result<Action, ReconcileError> {
    let key = nad_key(nad);
    let annotations: Annotations = nad.metadata.annotations.clone().unwrap_or_default();
    let config = nad.spec.config.clone();
    let previous = ctx.observed.read().await.get(&key).cloned();

    // A first sighting of an eligible NAD is a full attach; later edits
    // classify against the last-seen copy.
    let (conf, action) = match &previous {
        None => {
            let (conf, eligible) = nad::should_trigger_topo_action(&config, &annotations)?;
            (conf, eligible.then_some(NadAction::CreateAttach))
        }
        Some(prev) => {
            let (action, conf) = nad::should_trigger_topo_update(
                &prev.config,
                &prev.annotations,
                &config,
                &annotations,
            )?;
            (conf, action)
        }
    };

    if let Some(action) = action {
        info!(nad = %key, action = %action, "processing NetworkAttachmentDefinition");
        let targets = fabric_targets(&conf, &annotations)?;
        let nodes = node_topologies(&ctx.client, &annotations, &conf).await?;
        let mut provider = ctx.provider.write().await;
        match action {
            NadAction::CreateAttach | NadAction::UpdateAttach => {
                for target in &targets {
                    let status = provider
                        .attach(
                            &target.workload_evpn_name,
                            &target.subnet_name,
                            &target.vlan_range,
                            &nodes,
                            action,
                        )
                        .await?;
                    log_node_failures(&key, &status);
                }
            }
            NadAction::UpdateAttachDetach => {
                // Only the nodeSelector changed: open the VLANs on the
                // nodes that joined, close them on the nodes that left.
                let old_annotations = previous
                    .as_ref()
                    .map(|prev| prev.annotations.clone())
                    .unwrap_or_default();
                let old_nodes = node_topologies(&ctx.client, &old_annotations, &conf).await?;
                let added: BTreeMap<String, NodeTopology> = nodes
                    .iter()
                    .filter(|(node, _)| !old_nodes.contains_key(*node))
                    .map(|(node, topology)| (node.clone(), topology.clone()))
                    .collect();
                let removed: BTreeMap<String, NodeTopology> = old_nodes
                    .iter()
                    .filter(|(node, _)| !nodes.contains_key(*node))
                    .map(|(node, topology)| (node.clone(), topology.clone()))
                    .collect();
                for target in &targets {
                    if !added.is_empty() {
                        let status = provider
                            .attach(
                                &target.workload_evpn_name,
                                &target.subnet_name,
                                &target.vlan_range,
                                &added,
                                NadAction::NodeAttach,
                            )
                            .await?;
                        log_node_failures(&key, &status);
                    }
                    if !removed.is_empty() {
                        let status = provider
                            .detach(
                                &target.workload_evpn_name,
                                &target.subnet_name,
                                &target.vlan_range,
                                &removed,
                                NadAction::NodeDetach,
                            )
                            .await?;
                        log_node_failures(&key, &status);
                    }
                }
            }
            _ => {}
        }
        provider.txn_done().await;
    }

    ctx.observed
        .write()
        .await
        .insert(key, ObservedNad { config, annotations });
    Ok(Action::requeue(Duration::from_secs(300)))
}

async fn cleanup(
    nad: &NetworkAttachmentDefinition,
    ctx: &Context,
) -> Result<Action, ReconcileError> {
    let key = nad_key(nad);
    let annotations: Annotations = nad.metadata.annotations.clone().unwrap_or_default();
    // A NAD that no longer validates has nothing on the fabric.
    let (conf, eligible) = nad::should_trigger_topo_action(&nad.spec.config, &annotations)
        .unwrap_or((NetConf::default(), false));
    if eligible {
        info!(nad = %key, "closing VLANs for deleted NetworkAttachmentDefinition");
        let targets = fabric_targets(&conf, &annotations)?;
        let nodes = node_topologies(&ctx.client, &annotations, &conf).await?;
        let mut provider = ctx.provider.write().await;
        for target in &targets {
            let status = provider
                .detach(
                    &target.workload_evpn_name,
                    &target.subnet_name,
                    &target.vlan_range,
                    &nodes,
                    NadAction::DeleteDetach,
                )
                .await?;
            log_node_failures(&key, &status);
        }
        provider.txn_done().await;
    }
    ctx.observed.write().await.remove(&key);
    Ok(Action::await_change())
}

/// Lists the nodes the NAD's selector matches and decodes their
/// topology annotations. ipvlan networks consume the bond side, sriov
/// networks the SR-IOV pools.
async fn node_topologies(
    client: &kube::Client,
    annotations: &Annotations,
    conf: &NetConf,
) -> Result<BTreeMap<String, NodeTopology>, ReconcileError> {
    let mut topologies = BTreeMap::new();
    let Some(selector) = annotations.get(NODE_SELECTOR_KEY).filter(|s| !s.is_empty()) else {
        return Ok(topologies);
    };
    let nodes: Api<Node> = Api::all(client.clone());
    let params = ListParams::default().labels(selector);
    for node in nodes.list(&params).await? {
        let name = node.name_any();
        let Some(raw) = node
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(NETWORK_TOPOLOGY_KEY))
        else {
            continue;
        };
        match serde_json::from_str::<NodeTopology>(raw) {
            Ok(mut topology) => {
                match conf.cni_type.as_str() {
                    "ipvlan" => topology.sriov_pools.clear(),
                    "sriov" => topology.bonds.clear(),
                    _ => {}
                }
                topologies.insert(name, topology);
            }
            Err(e) => warn!(node = %name, error = %e, "invalid network topology annotation"),
        }
    }
    Ok(topologies)
}

fn log_node_failures(nad: &str, status: &NodesStatus) {
    for (node, failure) in status {
        if let Some(e) = failure {
            warn!(nad, node = %node, error = %e, "fabric operation failed on node");
        }
    }
}
