//! Authenticated JSON transport for the FSS Connect API.

use super::error::FssError;
use super::model::{ErrorResponse, LoginResponse};
use crate::config::AuthOpts;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Url};
use std::time::Duration;
use tracing::{debug, error, info};

/// FSS Connect resource paths.
pub mod paths {
    pub const PLUGINS: &str = "/rest/connect/api/v1/plugins/plugins";
    pub const DEPLOYMENTS: &str = "/rest/connect/api/v1/plugins/deployments";
    pub const TENANTS: &str = "/rest/connect/api/v1/plugins/tenants";
    pub const SUBNETS: &str = "/rest/connect/api/v1/plugins/subnets";
    pub const HOST_PORT_LABELS: &str = "/rest/connect/api/v1/plugins/hostportlabels";
    pub const HOST_PORTS: &str = "/rest/connect/api/v1/plugins/hostports";
    pub const HOST_PORT_ASSOCIATIONS: &str =
        "/rest/connect/api/v1/plugins/hostportlabelhostportassociations";
    pub const SUBNET_ASSOCIATIONS: &str =
        "/rest/connect/api/v1/plugins/hostportlabelsubnetassociations";
}

const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw authenticated access to the FSS REST API.
///
/// Implementations keep the token lifecycle to themselves; callers see
/// plain status + body pairs.
#[async_trait]
pub trait FssTransport: Send + Sync {
    async fn get(&mut self, path: &str) -> Result<(u16, Vec<u8>), FssError>;
    async fn post(&mut self, path: &str, body: Vec<u8>) -> Result<(u16, Vec<u8>), FssError>;
    async fn delete(&mut self, path: &str) -> Result<(u16, Vec<u8>), FssError>;
}

/// What the token state demands before the next request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Renewal {
    None,
    Refresh,
    Login,
}

#[derive(Clone, Debug, Default)]
struct TokenState {
    access_token: String,
    refresh_token: String,
    access_expiry: DateTime<Utc>,
    refresh_expiry: DateTime<Utc>,
}

impl TokenState {
    fn renewal(&self, now: DateTime<Utc>) -> Renewal {
        if now > self.refresh_expiry {
            Renewal::Login
        } else if now > self.access_expiry {
            Renewal::Refresh
        } else {
            Renewal::None
        }
    }

    fn absorb(&mut self, grant: LoginResponse, now: DateTime<Utc>, full_login: bool) {
        self.access_expiry = now + ChronoDuration::seconds(grant.expires_in);
        if full_login {
            self.refresh_expiry = now + ChronoDuration::seconds(grant.refresh_expires_in);
        }
        self.access_token = grant.access_token;
        self.refresh_token = grant.refresh_token;
    }
}

/// Derives `scheme://host[:port]` from the configured auth URL.
fn root_url(auth_url: &str) -> Result<String, FssError> {
    let url = Url::parse(auth_url)
        .map_err(|e| FssError::Config(format!("invalid auth-url {auth_url:?}: {e}")))?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(FssError::Config(format!(
            "auth-url {auth_url:?} has no host"
        )));
    }
    Ok(origin.ascii_serialization())
}

/// The refresh endpoint lives next to the login endpoint.
fn refresh_url(auth_url: &str) -> String {
    auth_url.replacen("login", "refresh", 1)
}

/// reqwest-backed [`FssTransport`] with transparent token renewal.
pub struct RestTransport {
    http: reqwest::Client,
    auth_url: String,
    refresh_url: String,
    root_url: String,
    username: String,
    password: String,
    tokens: TokenState,
}

impl RestTransport {
    /// Builds the client and performs the initial login.
    pub async fn connect(cfg: &AuthOpts) -> Result<Self, FssError> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if cfg.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let mut transport = Self {
            http: builder.build()?,
            auth_url: cfg.auth_url.clone(),
            refresh_url: refresh_url(&cfg.auth_url),
            root_url: root_url(&cfg.auth_url)?,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            tokens: TokenState::default(),
        };
        info!(url = %transport.auth_url, "logging in to fss");
        transport.login(false).await?;
        Ok(transport)
    }

    async fn login(&mut self, refresh: bool) -> Result<(), FssError> {
        let (url, body) = if refresh {
            (
                self.refresh_url.as_str(),
                serde_json::json!({ "refresh_token": self.tokens.refresh_token }),
            )
        } else {
            (
                self.auth_url.as_str(),
                serde_json::json!({ "username": self.username, "password": self.password }),
            )
        };
        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .body(serde_json::to_vec(&body)?);
        if refresh {
            request = request.bearer_auth(&self.tokens.access_token);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        if status != 200 {
            let detail: ErrorResponse = serde_json::from_slice(&bytes).unwrap_or_default();
            error!(status, title = %detail.title, detail = %detail.detail, "login error");
            return Err(FssError::Login(status));
        }
        let grant: LoginResponse = serde_json::from_slice(&bytes)?;
        self.tokens.absorb(grant, Utc::now(), !refresh);
        Ok(())
    }

    async fn renew_token(&mut self) -> Result<(), FssError> {
        match self.tokens.renewal(Utc::now()) {
            Renewal::Login => {
                debug!("refresh token expired, logging in again");
                self.login(false).await
            }
            Renewal::Refresh => {
                debug!("access token expired, refreshing");
                self.login(true).await
            }
            Renewal::None => Ok(()),
        }
    }

    async fn request(
        &mut self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(u16, Vec<u8>), FssError> {
        self.renew_token().await?;
        let url = format!("{}{}", self.root_url, path);
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.tokens.access_token);
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, CONTENT_TYPE_JSON).body(body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        Ok((status, bytes.to_vec()))
    }
}

#[async_trait]
impl FssTransport for RestTransport {
    async fn get(&mut self, path: &str) -> Result<(u16, Vec<u8>), FssError> {
        self.request(Method::GET, path, None).await
    }

    async fn post(&mut self, path: &str, body: Vec<u8>) -> Result<(u16, Vec<u8>), FssError> {
        self.request(Method::POST, path, Some(body)).await
    }

    async fn delete(&mut self, path: &str) -> Result<(u16, Vec<u8>), FssError> {
        self.request(Method::DELETE, path, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_url_keeps_scheme_host_and_port() {
        assert_eq!(
            root_url("https://fss.example.com/rest/auth/login").unwrap(),
            "https://fss.example.com"
        );
        assert_eq!(
            root_url("https://fss.example.com:8443/rest/auth/login").unwrap(),
            "https://fss.example.com:8443"
        );
        assert!(root_url("not a url").is_err());
    }

    #[test]
    fn test_refresh_url_replaces_first_login() {
        assert_eq!(
            refresh_url("https://fss.example.com/rest/auth/login"),
            "https://fss.example.com/rest/auth/refresh"
        );
    }

    #[test]
    fn test_token_renewal_transitions() {
        let now = Utc::now();
        let mut tokens = TokenState::default();
        tokens.absorb(
            LoginResponse {
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
                expires_in: 300,
                refresh_expires_in: 1800,
            },
            now,
            true,
        );
        assert_eq!(tokens.renewal(now), Renewal::None);
        assert_eq!(
            tokens.renewal(now + ChronoDuration::seconds(301)),
            Renewal::Refresh
        );
        assert_eq!(
            tokens.renewal(now + ChronoDuration::seconds(1801)),
            Renewal::Login
        );
    }

    #[test]
    fn test_refresh_does_not_extend_refresh_expiry() {
        let now = Utc::now();
        let mut tokens = TokenState::default();
        let grant = LoginResponse {
            expires_in: 300,
            refresh_expires_in: 1800,
            ..LoginResponse::default()
        };
        tokens.absorb(grant.clone(), now, true);
        let refresh_expiry = tokens.refresh_expiry;
        tokens.absorb(grant, now + ChronoDuration::seconds(300), false);
        assert_eq!(tokens.refresh_expiry, refresh_expiry);
        assert!(tokens.access_expiry > now + ChronoDuration::seconds(500));
    }
}
