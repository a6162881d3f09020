// std
use std::net::IpAddr;
// crates.io
use url::Host;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, ScopeValidationError},
	config::ProvisioningDescriptor,
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, ThisError)]
pub enum DescriptorError {
	/// Issuer URL is mandatory.
	#[error("Missing identity provider issuer.")]
	MissingIssuer,
	/// Portal URL is mandatory.
	#[error("Missing provisioning portal URL.")]
	MissingPortal,
	/// Client identifier must not be blank.
	#[error("Client identifier cannot be empty.")]
	EmptyClientId,
	/// Remote endpoints must use HTTPS unless they point at a loopback host.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// URL with a query or fragment cannot serve as a base.
	#[error("The {endpoint} endpoint cannot carry a query or fragment: {url}.")]
	NotABase {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Scope list was rejected.
	#[error(transparent)]
	Scopes(#[from] ScopeValidationError),
}

/// Builder for [`ProvisioningDescriptor`] values.
#[derive(Debug)]
pub struct ProvisioningDescriptorBuilder {
	/// OAuth client identifier.
	pub client_id: String,
	/// Identity provider issuer URL.
	pub issuer: Option<Url>,
	/// Provisioning portal base URL.
	pub portal: Option<Url>,
	/// Requested scopes.
	pub scopes: ScopeSet,
}
impl ProvisioningDescriptorBuilder {
	/// Creates a new builder for `client_id` with the default scopes.
	pub fn new(client_id: impl Into<String>) -> Self {
		Self { client_id: client_id.into(), issuer: None, portal: None, scopes: ScopeSet::default() }
	}

	/// Sets the issuer URL.
	pub fn issuer(mut self, url: Url) -> Self {
		self.issuer = Some(url);

		self
	}

	/// Sets the portal base URL.
	pub fn portal(mut self, url: Url) -> Self {
		self.portal = Some(url);

		self
	}

	/// Overrides the requested scopes.
	pub fn scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Parses and overrides the requested scopes from a space-delimited string.
	pub fn scope_str(mut self, scopes: &str) -> Result<Self, DescriptorError> {
		self.scopes = scopes.parse()?;

		Ok(self)
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProvisioningDescriptor, DescriptorError> {
		let client_id = self.client_id.trim().to_owned();

		if client_id.is_empty() {
			return Err(DescriptorError::EmptyClientId);
		}

		let issuer = normalize_base("issuer", self.issuer.ok_or(DescriptorError::MissingIssuer)?)?;
		let portal = normalize_base("portal", self.portal.ok_or(DescriptorError::MissingPortal)?)?;

		Ok(ProvisioningDescriptor { issuer, client_id, scopes: self.scopes, portal })
	}
}

fn normalize_base(endpoint: &'static str, mut url: Url) -> Result<Url, DescriptorError> {
	if url.query().is_some() || url.fragment().is_some() {
		return Err(DescriptorError::NotABase { endpoint, url: url.to_string() });
	}
	if url.scheme() != "https" && !(url.scheme() == "http" && is_loopback(&url)) {
		return Err(DescriptorError::InsecureEndpoint { endpoint, url: url.to_string() });
	}

	let trimmed = url.path().trim_end_matches('/').to_owned();

	url.set_path(&trimmed);

	Ok(url)
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
		Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
		None => false,
	}
}
