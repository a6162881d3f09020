//! Persistable enrollment record and provisioning status.

// self
use crate::{
	_prelude::*,
	auth::{HubId, Identity, TokenSecret},
	portal::{EnrollmentPayload, TunnelConfig, TunnelServer},
};

/// Credentials and tunnel parameters obtained from the portal.
///
/// The host owns and persists the record; the crate never caches it. Secrets serialize in
/// clear text for persistence and are redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
	/// Server-assigned hub identifier.
	pub hub_id: HubId,
	/// Server-assigned slug, when provided.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub slug: Option<String>,
	/// Public tunnel domain.
	pub tunnel_domain: String,
	/// Opaque long-lived device token used for `tunnel_config`.
	pub device_token: TokenSecret,
	/// Relay parameters.
	pub tunnel: TunnelServer,
	/// Tunnel secret. `None` means the portal withheld it and recovery failed.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tunnel_secret: Option<TokenSecret>,
}
impl EnrollmentRecord {
	/// Builds a record from an enrollment response, keeping a delivered secret.
	pub fn from_payload(payload: EnrollmentPayload) -> Self {
		Self {
			hub_id: payload.hub_id,
			slug: payload.slug,
			tunnel_domain: payload.tunnel_domain,
			device_token: payload.device_token,
			tunnel: payload.tunnel,
			tunnel_secret: payload.secret.into_secret(),
		}
	}

	/// Returns `true` when a tunnel secret is stored.
	pub fn has_tunnel_secret(&self) -> bool {
		self.tunnel_secret.is_some()
	}

	/// Merges the latest tunnel parameters. The stored secret is never touched.
	pub fn apply_tunnel_config(&mut self, config: TunnelConfig) {
		self.hub_id = config.hub_id;
		self.tunnel_domain = config.tunnel_domain;
		self.tunnel = config.tunnel;
	}

	/// Stores a freshly rotated tunnel secret.
	pub fn apply_rotated_secret(&mut self, secret: TokenSecret) {
		self.tunnel_secret = Some(secret);
	}

	/// Stores a freshly rotated device token.
	pub fn apply_rotated_device_token(&mut self, token: TokenSecret) {
		self.device_token = token;
	}

	/// Status tag for the record's current secret state.
	pub fn status(&self) -> ProvisioningStatus {
		if self.has_tunnel_secret() {
			ProvisioningStatus::Ok
		} else {
			ProvisioningStatus::DegradedNoSecret
		}
	}
}
impl Debug for EnrollmentRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EnrollmentRecord")
			.field("hub_id", &self.hub_id)
			.field("slug", &self.slug)
			.field("tunnel_domain", &self.tunnel_domain)
			.field("device_token", &self.device_token)
			.field("tunnel", &self.tunnel)
			.field("tunnel_secret", &self.tunnel_secret.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

/// Status tag the host shows next to a provisioned hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStatus {
	/// Fully provisioned.
	Ok,
	/// Enrolled, but no tunnel secret is available.
	DegradedNoSecret,
	/// The owner signed in but the portal exchange failed.
	ExchangeFailed,
}
impl ProvisioningStatus {
	/// Returns the stable wire label.
	pub const fn as_str(self) -> &'static str {
		match self {
			ProvisioningStatus::Ok => "ok",
			ProvisioningStatus::DegradedNoSecret => "degraded_no_secret",
			ProvisioningStatus::ExchangeFailed => "exchange_failed",
		}
	}
}
impl Display for ProvisioningStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Terminal output of a completed enrollment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrollmentOutcome {
	/// Record the host must persist.
	pub record: EnrollmentRecord,
	/// Owner identity; empty when the best-effort lookup failed.
	pub identity: Identity,
	/// Status tag.
	pub status: ProvisioningStatus,
	/// Whether the secret was recovered through rotation.
	pub secret_recovered: bool,
	/// Identity provider token used for the enrollment.
	///
	/// Short-lived; hosts may reuse it for an immediate follow-up rotation.
	pub access_token: TokenSecret,
}
