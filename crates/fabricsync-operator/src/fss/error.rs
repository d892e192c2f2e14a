//! Fabric client errors.

use fabricsync_core::vlan::InvalidVlanRange;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FssError {
    /// Network or I/O failure talking to the fabric.
    #[error("fss request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The fabric answered with an unexpected status.
    #[error("{what} failed with status={status}")]
    Api { what: &'static str, status: u16 },
    #[error("login failed with status={0}")]
    Login(u16),
    #[error("decode fss response failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
    /// The bookkeeping ConfigMap kept changing under us.
    #[error("configmap update conflicted {0} times in a row")]
    MirrorConflict(u32),
    #[error("host port does not exist for {node}/{port}")]
    MissingHostPort { node: String, port: String },
    #[error("requested vlan {0} does not exist")]
    UnknownVlan(u16),
    #[error(transparent)]
    VlanRange(#[from] InvalidVlanRange),
    #[error("{0}")]
    Config(String),
    #[error("provider is not connected")]
    NotConnected,
}

impl FssError {
    pub(crate) fn api(what: &'static str, status: u16) -> Self {
        FssError::Api { what, status }
    }
}
