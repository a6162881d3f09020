//! Provisioning portal client.
//!
//! Every call is a single authenticated request with a fixed timeout. HTTP 401/403 surfaces as
//! [`PortalAuthError`] so hosts route the user back through the device login; every other
//! failure is a [`PortalApiError`] and may be retried later.

pub mod payload;

pub use payload::*;

// std
use std::time::Duration as StdDuration;
// crates.io
use oauth2::http::Method;
// self
use crate::{
	_prelude::*,
	auth::{HubId, TokenSecret},
	error::{ConfigError, PortalApiError, PortalAuthError},
	http::{
		HttpTransport, TransportErrorMapper,
		request::{self, RawResponse},
	},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};
#[cfg(feature = "reqwest")]
use crate::http::{ReqwestHttpClient, ReqwestTransportErrorMapper};

const BODY_PREVIEW_LIMIT: usize = 256;
const HEALTH_PREVIEW_LIMIT: usize = 200;

#[cfg(feature = "reqwest")]
/// Portal client specialized for the crate's default reqwest transport stack.
pub type ReqwestPortalClient = PortalClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Portal operations, used for routing, timeouts, and error attribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortalOperation {
	/// `POST /api/ha/enroll`.
	Enroll,
	/// `GET /api/ha/frpc`.
	TunnelConfig,
	/// `POST /api/ha/token/rotate`.
	RotateDeviceToken,
	/// `POST /api/ha/frp/rotate`.
	RotateTunnelSecret,
	/// `GET /api/health`.
	Health,
}
impl PortalOperation {
	/// Returns a stable label suitable for logs and errors.
	pub const fn as_str(self) -> &'static str {
		match self {
			PortalOperation::Enroll => "enroll",
			PortalOperation::TunnelConfig => "tunnel_config",
			PortalOperation::RotateDeviceToken => "rotate_device_token",
			PortalOperation::RotateTunnelSecret => "rotate_tunnel_secret",
			PortalOperation::Health => "health",
		}
	}

	/// Route below the portal base URL.
	pub const fn path(self) -> &'static str {
		match self {
			PortalOperation::Enroll => "/api/ha/enroll",
			PortalOperation::TunnelConfig => "/api/ha/frpc",
			PortalOperation::RotateDeviceToken => "/api/ha/token/rotate",
			PortalOperation::RotateTunnelSecret => "/api/ha/frp/rotate",
			PortalOperation::Health => "/api/health",
		}
	}

	/// Fixed per-call timeout.
	pub const fn timeout(self) -> StdDuration {
		match self {
			PortalOperation::Health => StdDuration::from_secs(10),
			_ => StdDuration::from_secs(20),
		}
	}

	fn method(self) -> Method {
		match self {
			PortalOperation::TunnelConfig | PortalOperation::Health => Method::GET,
			_ => Method::POST,
		}
	}

	fn flow_kind(self) -> FlowKind {
		match self {
			PortalOperation::Enroll => FlowKind::Enrollment,
			PortalOperation::TunnelConfig => FlowKind::TunnelConfig,
			PortalOperation::RotateDeviceToken => FlowKind::TokenRotation,
			PortalOperation::RotateTunnelSecret => FlowKind::SecretRotation,
			PortalOperation::Health => FlowKind::Health,
		}
	}
}
impl Display for PortalOperation {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Client for the provisioning portal.
pub struct PortalClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client wrapper used for every portal request.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors.
	pub transport_mapper: Arc<M>,
	/// Portal base URL.
	pub base_url: Url,
}
impl<C, M> PortalClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a portal client that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		base_url: Url,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self { http_client: http_client.into(), transport_mapper: mapper.into(), base_url }
	}

	/// Enrolls or re-attaches the hub using the identity provider token.
	///
	/// Supplying [`EnrollRequest::hub_id`] signals a re-attach; the portal then decides whether
	/// to reveal a new secret.
	pub async fn enroll(
		&self,
		access_token: &TokenSecret,
		enrollment: &EnrollRequest,
	) -> Result<EnrollmentPayload> {
		let body = serde_json::to_value(enrollment)
			.map_err(|source| ConfigError::RequestBody { source })?;

		self.run(PortalOperation::Enroll, Some(access_token), Some(body), payload::parse_enrollment)
			.await
	}

	/// Fetches the current tunnel parameters with the opaque device token.
	///
	/// The result never carries a secret.
	pub async fn tunnel_config(&self, device_token: &TokenSecret) -> Result<TunnelConfig> {
		self.run(
			PortalOperation::TunnelConfig,
			Some(device_token),
			None,
			payload::parse_tunnel_config,
		)
		.await
	}

	/// Mints a new opaque device token. Requires a fresh identity provider token.
	pub async fn rotate_device_token(
		&self,
		access_token: &TokenSecret,
		hub_id: &HubId,
	) -> Result<TokenSecret> {
		self.run(
			PortalOperation::RotateDeviceToken,
			Some(access_token),
			Some(hub_body(hub_id)),
			payload::parse_rotated_token,
		)
		.await
	}

	/// Rotates the tunnel secret and returns the new value, revealed exactly once.
	///
	/// The previous secret stops working once this succeeds.
	pub async fn rotate_tunnel_secret(
		&self,
		access_token: &TokenSecret,
		hub_id: &HubId,
	) -> Result<TokenSecret> {
		self.run(
			PortalOperation::RotateTunnelSecret,
			Some(access_token),
			Some(hub_body(hub_id)),
			payload::parse_rotated_secret,
		)
		.await
	}

	/// Probes `GET /api/health`. Never fails; failures are reported in the result.
	pub async fn health(&self) -> PortalHealth {
		const OP: PortalOperation = PortalOperation::Health;

		let span = FlowSpan::new(OP.flow_kind(), "health");

		obs::record_flow_outcome(OP.flow_kind(), FlowOutcome::Attempt);

		let health = span
			.instrument(async move {
				let started = OffsetDateTime::now_utc();
				let outcome = match self.request(OP, None, None) {
					Ok(outgoing) => self.dispatch(OP, outgoing).await,
					Err(e) => Err(e),
				};
				let latency = OffsetDateTime::now_utc() - started;

				match outcome {
					Ok(response) => PortalHealth {
						ok: response.is_success(),
						status: Some(response.status),
						details: response.preview(HEALTH_PREVIEW_LIMIT),
						latency,
					},
					Err(e) => PortalHealth {
						ok: false,
						status: None,
						details: request::truncate_preview(&e.to_string(), HEALTH_PREVIEW_LIMIT),
						latency,
					},
				}
			})
			.await;

		obs::record_flow_outcome(
			OP.flow_kind(),
			if health.ok { FlowOutcome::Success } else { FlowOutcome::Failure },
		);

		health
	}

	async fn run<T, P>(
		&self,
		operation: PortalOperation,
		bearer: Option<&TokenSecret>,
		body: Option<JsonValue>,
		parse: P,
	) -> Result<T>
	where
		P: FnOnce(&RawResponse) -> Result<T, PortalApiError>,
	{
		let kind = operation.flow_kind();
		let span = FlowSpan::new(kind, operation.as_str());

		obs::record_flow_outcome(kind, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let outgoing = self.request(operation, bearer, body.as_ref())?;
				let response = self.dispatch(operation, outgoing).await?;

				if bearer.is_some() && response.is_auth_failure() {
					return Err(Error::from(PortalAuthError {
						operation,
						status: response.status,
						reason: response
							.json_value()
							.and_then(|value| request::string_field(&value, "error")),
					}));
				}
				if !response.is_success() {
					return Err(Error::from(PortalApiError::Status {
						operation,
						status: response.status,
						body: response.preview(BODY_PREVIEW_LIMIT),
					}));
				}

				parse(&response).map_err(Error::from)
			})
			.await;

		obs::record_result(kind, &result);

		result
	}

	fn request(
		&self,
		operation: PortalOperation,
		bearer: Option<&TokenSecret>,
		body: Option<&JsonValue>,
	) -> Result<oauth2::HttpRequest> {
		let url = request::join_path(&self.base_url, operation.path());

		Ok(request::json_request(
			operation.method(),
			&url,
			bearer.map(TokenSecret::expose),
			body,
			operation.timeout(),
		)?)
	}

	async fn dispatch(
		&self,
		operation: PortalOperation,
		outgoing: oauth2::HttpRequest,
	) -> Result<RawResponse> {
		request::execute(self.http_client.as_ref(), self.transport_mapper.as_ref(), outgoing)
			.await
			.map_err(|source| PortalApiError::Transport { operation, source }.into())
	}
}
#[cfg(feature = "reqwest")]
impl PortalClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a portal client backed by the default reqwest transport.
	pub fn new(base_url: Url) -> Result<Self, ConfigError> {
		Ok(Self::with_http_client(
			base_url,
			ReqwestHttpClient::without_redirects()?,
			ReqwestTransportErrorMapper,
		))
	}
}
impl<C, M> Clone for PortalClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			http_client: self.http_client.clone(),
			transport_mapper: self.transport_mapper.clone(),
			base_url: self.base_url.clone(),
		}
	}
}
impl<C, M> Debug for PortalClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PortalClient").field("base_url", &self.base_url).finish()
	}
}

fn hub_body(hub_id: &HubId) -> JsonValue {
	serde_json::json!({ "ha_uuid": hub_id.as_ref() })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn operations_route_and_time_out_as_documented() {
		assert_eq!(PortalOperation::Enroll.path(), "/api/ha/enroll");
		assert_eq!(PortalOperation::RotateTunnelSecret.path(), "/api/ha/frp/rotate");
		assert_eq!(PortalOperation::TunnelConfig.method(), Method::GET);
		assert_eq!(PortalOperation::Health.timeout(), StdDuration::from_secs(10));
		assert_eq!(PortalOperation::RotateDeviceToken.timeout(), StdDuration::from_secs(20));
	}

	#[test]
	fn hub_body_uses_wire_key() {
		let hub = HubId::new("hub-1").expect("Hub id should be valid.");

		assert_eq!(hub_body(&hub), serde_json::json!({ "ha_uuid": "hub-1" }));
	}
}
