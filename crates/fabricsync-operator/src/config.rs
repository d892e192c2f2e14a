//! Provider credential file.
//!
//! The fabric credentials are mounted as an INI file with a single
//! `[Global]` section, e.g.:
//!
//! ```ini
//! [Global]
//! auth-url = https://fss.example.com/rest/auth/login
//! username = admin
//! password = secret
//! cluster-name = cluster-1
//! regionid = region-a
//! insecure = true
//! ```

use ini::Ini;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read provider config failed: {0}")]
    Read(#[from] ini::Error),
    #[error("provider config is missing the [Global] section")]
    MissingGlobal,
    #[error("provider config is missing required key {0:?}")]
    MissingKey(&'static str),
    #[error("provider config has invalid boolean {value:?} for {key:?}")]
    InvalidBool { key: &'static str, value: String },
}

/// Fabric authentication and registration options.
#[derive(Clone, Debug)]
pub struct AuthOpts {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub cluster_name: String,
    pub restart_mode: String,
    pub region_id: String,
    pub insecure: bool,
}

impl AuthOpts {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_ini(&Ini::load_from_file(path)?)
    }

    pub fn from_str(raw: &str) -> Result<Self, ConfigError> {
        Self::from_ini(&Ini::load_from_str(raw).map_err(ini::Error::Parse)?)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let global = ini.section(Some("Global")).ok_or(ConfigError::MissingGlobal)?;
        let required = |key: &'static str| {
            global
                .get(key)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
                .ok_or(ConfigError::MissingKey(key))
        };
        let insecure = match global.get("insecure") {
            None => false,
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidBool {
                    key: "insecure",
                    value: raw.to_string(),
                })?,
        };
        Ok(Self {
            auth_url: required("auth-url")?,
            username: required("username")?,
            password: required("password")?,
            cluster_name: required("cluster-name")?,
            restart_mode: global
                .get("restart-mode")
                .unwrap_or("resync")
                .to_string(),
            region_id: global.get("regionid").unwrap_or_default().to_string(),
            insecure,
        })
    }
}
