//! Host-supplied configuration: provider/portal descriptor, management API access, and the
//! local endpoint the tunnel forwards to.

/// Builder API for assembling provisioning descriptors.
pub mod builder;

pub use builder::*;

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
	error::ConfigError,
	oidc::OidcEndpoints,
};

/// Management API base URL inside the host platform.
pub const DEFAULT_MANAGEMENT_URL: &str = "http://supervisor";
/// Environment variable holding the management API bearer token.
pub const MANAGEMENT_TOKEN_ENV: &str = "SUPERVISOR_TOKEN";
/// Address the tunnel client forwards to unless the host overrides it.
pub const DEFAULT_LOCAL_IP: &str = "127.0.0.1";
/// Port the tunnel client forwards to unless the host overrides it.
pub const DEFAULT_LOCAL_PORT: u16 = 8123;

/// Validated identity provider + portal configuration persisted by the host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningDescriptor {
	/// Identity provider issuer (realm) URL, without a trailing slash.
	pub issuer: Url,
	/// Public OAuth client identifier registered for device login.
	pub client_id: String,
	/// Scopes requested during the device grant.
	pub scopes: ScopeSet,
	/// Provisioning portal base URL.
	pub portal: Url,
}
impl ProvisioningDescriptor {
	/// Creates a new builder for the provided client identifier.
	pub fn builder(client_id: impl Into<String>) -> ProvisioningDescriptorBuilder {
		ProvisioningDescriptorBuilder::new(client_id)
	}

	/// Derives the identity provider endpoints from the issuer.
	pub fn oidc_endpoints(&self) -> Result<OidcEndpoints, ConfigError> {
		OidcEndpoints::from_issuer(&self.issuer)
	}
}

/// Access to the local management API.
#[derive(Clone, Debug)]
pub struct ManagementConfig {
	/// Base URL of the management API.
	pub base_url: Url,
	/// Bearer token presented on every call.
	pub token: TokenSecret,
}
impl ManagementConfig {
	/// Creates a config for an explicit endpoint and token.
	pub fn new(base_url: Url, token: TokenSecret) -> Self {
		Self { base_url, token }
	}

	/// Reads the token from `SUPERVISOR_TOKEN` and targets the default management URL.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Same as [`ManagementConfig::from_env`] with a caller-provided variable lookup.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let token = lookup(MANAGEMENT_TOKEN_ENV)
			.and_then(TokenSecret::non_empty)
			.ok_or(ConfigError::MissingManagementToken { variable: MANAGEMENT_TOKEN_ENV })?;
		let base_url = Url::parse(DEFAULT_MANAGEMENT_URL)
			.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "management", source })?;

		Ok(Self { base_url, token })
	}
}

/// Local address the tunnel client exposes through the tunnel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEndpoint {
	/// Host or IP address.
	pub ip: String,
	/// TCP port.
	pub port: u16,
}
impl Default for LocalEndpoint {
	fn default() -> Self {
		Self { ip: DEFAULT_LOCAL_IP.into(), port: DEFAULT_LOCAL_PORT }
	}
}
