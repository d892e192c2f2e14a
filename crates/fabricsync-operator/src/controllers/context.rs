//! Shared controller context

use crate::provider::VlanProvider;
use fabricsync_core::nad::Annotations;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Last-seen copy of a NAD, kept to classify later edits.
#[derive(Clone, Debug, Default)]
pub struct ObservedNad {
    pub config: String,
    pub annotations: Annotations,
}

/// Shared context for the NAD controller.
pub struct Context {
    pub client: kube::Client,
    pub provider: RwLock<Box<dyn VlanProvider>>,
    pub observed: RwLock<BTreeMap<String, ObservedNad>>,
}

impl Context {
    pub fn new(client: kube::Client, provider: Box<dyn VlanProvider>) -> Self {
        Self {
            client,
            provider: RwLock::new(provider),
            observed: RwLock::new(BTreeMap::new()),
        }
    }
}
