//! Mirror persistence in the `fss-database` ConfigMap.

use super::error::FssError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ObjectMeta, PostParams};
use std::collections::BTreeMap;
use tracing::debug;

pub const CONFIGMAP_NAME: &str = "fss-database";
pub const PLUGIN_KEY: &str = "plugin";
pub const DEPLOYMENT_KEY: &str = "deployment";
pub const DATABASE_KEY: &str = "database";

const UPDATE_ATTEMPTS: u32 = 256;

/// Durable key/value storage for the registration records and the
/// mirror document.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Returns the stored keys, or `None` when no store exists yet.
    async fn load(&self) -> Result<Option<BTreeMap<String, String>>, FssError>;
    /// Creates the store with empty values.
    async fn create(&self) -> Result<(), FssError>;
    /// Writes one key.
    async fn save(&self, key: &str, value: String) -> Result<(), FssError>;
}

/// [`MirrorStore`] backed by the `fss-database` ConfigMap in the
/// operator's namespace.
pub struct ConfigMapStore {
    api: Api<ConfigMap>,
}

impl ConfigMapStore {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl MirrorStore for ConfigMapStore {
    async fn load(&self) -> Result<Option<BTreeMap<String, String>>, FssError> {
        match self.api.get(CONFIGMAP_NAME).await {
            Ok(configmap) => Ok(Some(configmap.data.unwrap_or_default())),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self) -> Result<(), FssError> {
        let configmap = ConfigMap {
            metadata: ObjectMeta {
                name: Some(CONFIGMAP_NAME.to_string()),
                ..ObjectMeta::default()
            },
            data: Some(
                [PLUGIN_KEY, DEPLOYMENT_KEY, DATABASE_KEY]
                    .into_iter()
                    .map(|key| (key.to_string(), String::new()))
                    .collect(),
            ),
            ..ConfigMap::default()
        };
        self.api.create(&PostParams::default(), &configmap).await?;
        Ok(())
    }

    /// Optimistic-concurrency write: re-fetch and retry on resource
    /// version conflict, bounded so a livelock surfaces as an error.
    async fn save(&self, key: &str, value: String) -> Result<(), FssError> {
        for attempt in 1..=UPDATE_ATTEMPTS {
            let mut configmap = self.api.get(CONFIGMAP_NAME).await?;
            configmap
                .data
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value.clone());
            match self
                .api
                .replace(CONFIGMAP_NAME, &PostParams::default(), &configmap)
                .await
            {
                Ok(_) => return Ok(()),
                Err(kube::Error::Api(response)) if response.code == 409 => {
                    debug!(key, attempt, "conflict updating configmap, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(FssError::MirrorConflict(UPDATE_ATTEMPTS))
    }
}
