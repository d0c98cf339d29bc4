use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::error::ConfigError;
use crate::verifier::VerificationKey;

pub const DEFAULT_STATE_COOKIE_NAME: &str = "OAuth_Token_Request_State";
pub const DEFAULT_CONFIDENTIAL_PORT: u16 = 8443;

/// Realm-wide revocation watermark: tokens issued before it are stale.
///
/// Only ever moves forward. Readers never block and never see a torn value.
#[derive(Debug, Default)]
pub struct NotBefore(AtomicU64);

impl NotBefore {
    pub fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Raises the watermark to `candidate` if it is higher. Returns the value
    /// in effect afterwards.
    pub fn advance(&self, candidate: u64) -> u64 {
        self.raise(candidate).max(candidate)
    }

    /// Like [`NotBefore::advance`] but returns the value seen before the
    /// update; the watermark moved only if that is below `candidate`.
    pub fn raise(&self, candidate: u64) -> u64 {
        self.0.fetch_max(candidate, Ordering::AcqRel)
    }
}

/// Per-client settings shared by every login attempt against one protected resource.
pub struct Deployment {
    realm: String,
    client_id: String,
    client_secret: Option<String>,
    auth_url: Url,
    token_url: Url,
    require_secure_transport: bool,
    confidential_port: Option<u16>,
    scope: Option<String>,
    state_cookie_name: String,
    realm_key: VerificationKey,
    not_before: NotBefore,
}

impl std::fmt::Debug for Deployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployment")
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("auth_url", &self.auth_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("require_secure_transport", &self.require_secure_transport)
            .field("confidential_port", &self.confidential_port)
            .field("scope", &self.scope)
            .field("state_cookie_name", &self.state_cookie_name)
            .field("not_before", &self.not_before.get())
            .finish_non_exhaustive()
    }
}

impl Deployment {
    pub fn builder(
        realm: impl Into<String>,
        client_id: impl Into<String>,
        realm_key: VerificationKey,
    ) -> DeploymentBuilder {
        DeploymentBuilder {
            realm: realm.into(),
            client_id: client_id.into(),
            realm_key,
            client_secret: None,
            auth_url: String::new(),
            token_url: String::new(),
            require_secure_transport: true,
            confidential_port: None,
            scope: None,
            state_cookie_name: DEFAULT_STATE_COOKIE_NAME.to_string(),
            not_before: 0,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: AdapterConfig = serde_json::from_str(json)?;
        config.into_deployment()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    pub fn require_secure_transport(&self) -> bool {
        self.require_secure_transport
    }

    pub fn confidential_port(&self) -> Option<u16> {
        self.confidential_port
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn state_cookie_name(&self) -> &str {
        &self.state_cookie_name
    }

    pub fn realm_key(&self) -> &VerificationKey {
        &self.realm_key
    }

    pub fn not_before(&self) -> u64 {
        self.not_before.get()
    }

    pub fn advance_not_before(&self, candidate: u64) -> u64 {
        let previous = self.not_before.raise(candidate);
        if previous < candidate {
            log::debug!(
                "not-before watermark for realm {} advanced from {previous} to {candidate}",
                self.realm
            );
        }
        previous.max(candidate)
    }
}

pub struct DeploymentBuilder {
    realm: String,
    client_id: String,
    realm_key: VerificationKey,
    client_secret: Option<String>,
    auth_url: String,
    token_url: String,
    require_secure_transport: bool,
    confidential_port: Option<u16>,
    scope: Option<String>,
    state_cookie_name: String,
    not_before: u64,
}

impl DeploymentBuilder {
    pub fn auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn require_secure_transport(mut self, required: bool) -> Self {
        self.require_secure_transport = required;
        self
    }

    /// Port substituted when an insecure request has to be upgraded. `0` means none.
    pub fn confidential_port(mut self, port: u16) -> Self {
        self.confidential_port = (port != 0).then_some(port);
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn state_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.state_cookie_name = name.into();
        self
    }

    pub fn not_before(mut self, value: u64) -> Self {
        self.not_before = value;
        self
    }

    pub fn build(self) -> Result<Deployment, ConfigError> {
        if self.realm.trim().is_empty() {
            return Err(ConfigError::Invalid("realm is required".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("client id is required".to_string()));
        }
        if self.state_cookie_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "state cookie name must not be empty".to_string(),
            ));
        }

        let scope = self.scope.filter(|s| !s.trim().is_empty());
        let client_secret = self.client_secret.filter(|s| !s.is_empty());

        Ok(Deployment {
            auth_url: Url::parse(&self.auth_url)?,
            token_url: Url::parse(&self.token_url)?,
            realm: self.realm,
            client_id: self.client_id,
            client_secret,
            require_secure_transport: self.require_secure_transport,
            confidential_port: self.confidential_port,
            scope,
            state_cookie_name: self.state_cookie_name,
            realm_key: self.realm_key,
            not_before: NotBefore::new(self.not_before),
        })
    }
}

/// JSON adapter configuration, as handed out by the identity server for a client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AdapterConfig {
    pub realm: String,
    pub resource: String,
    pub realm_public_key: String,
    pub auth_server_url: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub ssl_required: Option<String>,
    pub confidential_port: Option<u16>,
    pub scope: Option<String>,
    pub state_cookie_name: Option<String>,
    pub credentials: Credentials,
    pub public_client: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub secret: Option<String>,
}

impl AdapterConfig {
    pub fn normalize(mut self) -> Result<Self, ConfigError> {
        if self.realm.trim().is_empty() {
            return Err(ConfigError::Invalid("realm is required".to_string()));
        }
        if self.resource.trim().is_empty() {
            return Err(ConfigError::Invalid("resource is required".to_string()));
        }
        if self.realm_public_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "realm-public-key is required".to_string(),
            ));
        }

        if self.auth_url.is_none() || self.token_url.is_none() {
            let base = self
                .auth_server_url
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    ConfigError::Invalid(
                        "auth-server-url is required unless auth-url and token-url are set"
                            .to_string(),
                    )
                })?;
            if self.auth_url.is_none() {
                self.auth_url = Some(realm_endpoint(base, &self.realm, "auth")?.to_string());
            }
            if self.token_url.is_none() {
                self.token_url = Some(realm_endpoint(base, &self.realm, "token")?.to_string());
            }
        }

        if self.confidential_port.is_none() {
            self.confidential_port = Some(DEFAULT_CONFIDENTIAL_PORT);
        }
        if self
            .state_cookie_name
            .as_deref()
            .is_none_or(|name| name.trim().is_empty())
        {
            self.state_cookie_name = Some(DEFAULT_STATE_COOKIE_NAME.to_string());
        }
        if self.public_client {
            self.credentials.secret = None;
        }

        Ok(self)
    }

    pub fn require_secure_transport(&self) -> Result<bool, ConfigError> {
        match self.ssl_required.as_deref().unwrap_or("external") {
            "none" => Ok(false),
            "all" | "external" => Ok(true),
            other => Err(ConfigError::Invalid(format!(
                "ssl-required must be one of all, external, none (got {other})"
            ))),
        }
    }

    pub fn into_deployment(self) -> Result<Deployment, ConfigError> {
        let config = self.normalize()?;
        let realm_key = VerificationKey::from_pem_or_base64(&config.realm_public_key)?;
        let require_secure_transport = config.require_secure_transport()?;

        let mut builder = Deployment::builder(config.realm, config.resource, realm_key)
            .auth_url(config.auth_url.unwrap_or_default())
            .token_url(config.token_url.unwrap_or_default())
            .require_secure_transport(require_secure_transport)
            .confidential_port(config.confidential_port.unwrap_or(0));

        if let Some(scope) = config.scope {
            builder = builder.scope(scope);
        }
        if let Some(name) = config.state_cookie_name {
            builder = builder.state_cookie_name(name);
        }
        if let Some(secret) = config.credentials.secret {
            builder = builder.client_secret(secret);
        }

        builder.build()
    }
}

fn realm_endpoint(base: &str, realm: &str, endpoint: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| ConfigError::Invalid(format!("auth-server-url cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(["realms", realm, "protocol", "openid-connect", endpoint]);
    Ok(url)
}
