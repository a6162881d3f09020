//! Portal request bodies and typed response payloads.

// self
use crate::{
	_prelude::*,
	auth::{DeviceUid, HubId, TokenSecret},
	error::PortalApiError,
	http::request::{self, RawResponse},
	portal::PortalOperation,
};

/// Tunnel server port assumed when the portal omits it.
pub const DEFAULT_TUNNEL_SERVER_PORT: u16 = 7000;

/// Body of `POST /api/ha/enroll`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EnrollRequest {
	/// Locally stable device identifier.
	pub device_uid: DeviceUid,
	/// Hardware address, when known.
	pub device_mac: Option<String>,
	/// Human label shown on the portal.
	pub label: Option<String>,
	/// Previously assigned hub identifier; present only when re-attaching.
	#[serde(rename = "ha_uuid", skip_serializing_if = "Option::is_none")]
	pub hub_id: Option<HubId>,
}

/// One-time secret delivery as modelled by the portal.
///
/// The portal reveals a tunnel secret only on first enrollment or explicit rotation; every
/// other response withholds it and the caller must already hold the value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecretDelivery {
	/// The portal revealed the secret in this response.
	Delivered(TokenSecret),
	/// The portal retained the secret.
	Withheld,
}
impl SecretDelivery {
	fn from_wire(value: Option<String>) -> Self {
		match value.and_then(TokenSecret::non_empty) {
			Some(secret) => Self::Delivered(secret),
			None => Self::Withheld,
		}
	}

	/// Returns `true` when a secret was revealed.
	pub fn is_delivered(&self) -> bool {
		matches!(self, Self::Delivered(_))
	}

	/// Converts into the revealed secret, if any.
	pub fn into_secret(self) -> Option<TokenSecret> {
		match self {
			Self::Delivered(secret) => Some(secret),
			Self::Withheld => None,
		}
	}
}

/// Relay server the tunnel client connects to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelServer {
	/// Relay host.
	pub addr: String,
	/// Relay port.
	pub port: u16,
	/// Whether the tunnel uses TLS.
	pub tls_enabled: bool,
}

/// Successful enrollment response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrollmentPayload {
	/// Server-assigned hub identifier.
	pub hub_id: HubId,
	/// Server-assigned slug, when provided.
	pub slug: Option<String>,
	/// Public tunnel domain.
	pub tunnel_domain: String,
	/// Opaque long-lived device token.
	pub device_token: TokenSecret,
	/// Relay parameters.
	pub tunnel: TunnelServer,
	/// Tunnel secret, revealed only on first enrollment.
	pub secret: SecretDelivery,
}

/// Current tunnel parameters as reported by `GET /api/ha/frpc`.
///
/// Carries no secret; a secret sent by the server here is ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelConfig {
	/// Hub identifier.
	pub hub_id: HubId,
	/// Public tunnel domain.
	pub tunnel_domain: String,
	/// Relay parameters.
	pub tunnel: TunnelServer,
}

/// Result of a portal health probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortalHealth {
	/// Whether the portal answered with a success status.
	pub ok: bool,
	/// HTTP status, when a response was received.
	pub status: Option<u16>,
	/// Truncated body or failure description.
	pub details: String,
	/// Round-trip time of the probe.
	pub latency: Duration,
}

#[derive(Deserialize)]
struct ServerWire {
	#[serde(default)]
	server_addr: Option<String>,
	#[serde(default, deserialize_with = "request::lenient_u64")]
	server_port: Option<u64>,
	#[serde(default, deserialize_with = "request::lenient_bool")]
	tls_enable: Option<bool>,
	#[serde(default)]
	ha_uuid: Option<String>,
	#[serde(default)]
	tunnel_domain: Option<String>,
}

#[derive(Deserialize)]
struct EnrollFrpcWire {
	#[serde(flatten)]
	server: ServerWire,
	#[serde(default)]
	device_secret: Option<String>,
}

#[derive(Deserialize)]
struct EnrollWire {
	#[serde(default)]
	ok: Option<bool>,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	ha_uuid: Option<String>,
	#[serde(default)]
	slug: Option<String>,
	#[serde(default)]
	tunnel_domain: Option<String>,
	#[serde(default)]
	device_token: Option<String>,
	#[serde(default)]
	device_secret: Option<String>,
	#[serde(default)]
	frpc: Option<EnrollFrpcWire>,
}

#[derive(Deserialize)]
struct TunnelConfigWire {
	#[serde(default)]
	ok: Option<bool>,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	ha_uuid: Option<String>,
	#[serde(default)]
	tunnel_domain: Option<String>,
	#[serde(default)]
	frpc: Option<ServerWire>,
}

#[derive(Deserialize)]
struct RotateTokenWire {
	#[serde(default)]
	ok: Option<bool>,
	#[serde(default)]
	error: Option<String>,
	#[serde(default, alias = "token")]
	device_token: Option<String>,
}

#[derive(Deserialize)]
struct SecretOnlyWire {
	#[serde(default)]
	device_secret: Option<String>,
}

#[derive(Deserialize)]
struct RotateSecretWire {
	#[serde(default)]
	ok: Option<bool>,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	device_secret: Option<String>,
	#[serde(default)]
	frpc: Option<SecretOnlyWire>,
}

pub(crate) fn parse_enrollment(
	response: &RawResponse,
) -> Result<EnrollmentPayload, PortalApiError> {
	const OP: PortalOperation = PortalOperation::Enroll;

	let wire: EnrollWire = decode(OP, response)?;

	ensure_not_refused(OP, wire.ok, wire.error, response, false)?;

	let frpc = wire.frpc.ok_or(PortalApiError::MissingField { operation: OP, field: "frpc" })?;
	let hub_id = hub_id(OP, wire.ha_uuid.or_else(|| frpc.server.ha_uuid.clone()))?;
	let tunnel_domain = required(
		OP,
		"tunnel_domain",
		wire.tunnel_domain.or_else(|| frpc.server.tunnel_domain.clone()),
	)?;
	let device_token = wire
		.device_token
		.and_then(TokenSecret::non_empty)
		.ok_or(PortalApiError::MissingField { operation: OP, field: "device_token" })?;
	let tunnel = tunnel_server(OP, &frpc.server)?;

	Ok(EnrollmentPayload {
		hub_id,
		slug: wire.slug.filter(|slug| !slug.is_empty()),
		tunnel_domain,
		device_token,
		tunnel,
		secret: SecretDelivery::from_wire(frpc.device_secret.or(wire.device_secret)),
	})
}

pub(crate) fn parse_tunnel_config(response: &RawResponse) -> Result<TunnelConfig, PortalApiError> {
	const OP: PortalOperation = PortalOperation::TunnelConfig;

	let wire: TunnelConfigWire = decode(OP, response)?;

	ensure_not_refused(OP, wire.ok, wire.error, response, true)?;

	let frpc = wire.frpc.ok_or(PortalApiError::MissingField { operation: OP, field: "frpc" })?;
	let hub_id = hub_id(OP, wire.ha_uuid.or_else(|| frpc.ha_uuid.clone()))?;
	let tunnel_domain =
		required(OP, "tunnel_domain", wire.tunnel_domain.or_else(|| frpc.tunnel_domain.clone()))?;

	Ok(TunnelConfig { hub_id, tunnel_domain, tunnel: tunnel_server(OP, &frpc)? })
}

pub(crate) fn parse_rotated_token(response: &RawResponse) -> Result<TokenSecret, PortalApiError> {
	const OP: PortalOperation = PortalOperation::RotateDeviceToken;

	let wire: RotateTokenWire = decode(OP, response)?;

	ensure_not_refused(OP, wire.ok, wire.error, response, false)?;

	wire.device_token
		.and_then(TokenSecret::non_empty)
		.ok_or(PortalApiError::MissingField { operation: OP, field: "device_token" })
}

pub(crate) fn parse_rotated_secret(response: &RawResponse) -> Result<TokenSecret, PortalApiError> {
	const OP: PortalOperation = PortalOperation::RotateTunnelSecret;

	let wire: RotateSecretWire = decode(OP, response)?;

	ensure_not_refused(OP, wire.ok, wire.error, response, false)?;

	match SecretDelivery::from_wire(
		wire.device_secret.or_else(|| wire.frpc.and_then(|frpc| frpc.device_secret)),
	) {
		SecretDelivery::Delivered(secret) => Ok(secret),
		SecretDelivery::Withheld =>
			Err(PortalApiError::MissingField { operation: OP, field: "device_secret" }),
	}
}

fn decode<T>(operation: PortalOperation, response: &RawResponse) -> Result<T, PortalApiError>
where
	T: DeserializeOwned,
{
	response.json().map_err(|source| PortalApiError::Malformed { operation, source })
}

fn ensure_not_refused(
	operation: PortalOperation,
	ok: Option<bool>,
	error: Option<String>,
	response: &RawResponse,
	require_ok: bool,
) -> Result<(), PortalApiError> {
	let refused = match ok {
		Some(flag) => !flag,
		None => require_ok,
	};

	if refused {
		let message = error.unwrap_or_else(|| response.preview(super::BODY_PREVIEW_LIMIT));

		return Err(PortalApiError::Rejected { operation, message });
	}

	Ok(())
}

fn required(
	operation: PortalOperation,
	field: &'static str,
	value: Option<String>,
) -> Result<String, PortalApiError> {
	value
		.filter(|value| !value.trim().is_empty())
		.ok_or(PortalApiError::MissingField { operation, field })
}

fn hub_id(operation: PortalOperation, value: Option<String>) -> Result<HubId, PortalApiError> {
	HubId::new(required(operation, "ha_uuid", value)?)
		.map_err(|_| PortalApiError::MissingField { operation, field: "ha_uuid" })
}

fn tunnel_server(
	operation: PortalOperation,
	wire: &ServerWire,
) -> Result<TunnelServer, PortalApiError> {
	let addr = required(operation, "frpc.server_addr", wire.server_addr.clone())?;
	let port = match wire.server_port {
		None => DEFAULT_TUNNEL_SERVER_PORT,
		Some(raw) => u16::try_from(raw)
			.map_err(|_| PortalApiError::MissingField { operation, field: "frpc.server_port" })?,
	};

	Ok(TunnelServer { addr, port, tls_enabled: wire.tls_enable.unwrap_or(false) })
}
