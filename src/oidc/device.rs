//! OAuth 2.0 Device Authorization Grant (RFC 8628) against a Keycloak-style realm.
//!
//! The client never loops or sleeps: [`DeviceGrantClient::poll_token_once`] issues exactly one
//! token request so the host decides when the user has had time to approve the login.

// std
use std::time::Duration as StdDuration;
// crates.io
use oauth2::http::Method;
// self
use crate::{
	_prelude::*,
	auth::{Identity, ScopeSet, TokenSecret},
	config::ProvisioningDescriptor,
	error::{ConfigError, DeviceAuthError, UserinfoError},
	http::{
		HttpTransport, TransportErrorMapper,
		request::{self, RawResponse},
	},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	oidc::OidcEndpoints,
};
#[cfg(feature = "reqwest")]
use crate::http::{ReqwestHttpClient, ReqwestTransportErrorMapper};

/// Grant type sent when polling the token endpoint.
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

const IDP_TIMEOUT: StdDuration = StdDuration::from_secs(20);
const DEFAULT_EXPIRES_IN_SECS: u64 = 600;
const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_TOKEN_TYPE: &str = "Bearer";
const DEFAULT_TOKEN_EXPIRES_IN_SECS: u64 = 300;
const ERROR_PREVIEW_LIMIT: usize = 300;
const USERINFO_PREVIEW_LIMIT: usize = 200;
const UNKNOWN_ERROR: &str = "unknown_error";
const INVALID_RESPONSE: &str = "invalid_response";
const TRANSPORT_ERROR: &str = "transport_error";

#[cfg(feature = "reqwest")]
/// Device grant client specialized for the crate's default reqwest transport stack.
pub type ReqwestDeviceGrantClient =
	DeviceGrantClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Device code issued by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCode {
	/// Opaque code presented on every poll.
	pub device_code: TokenSecret,
	/// Code the user types on the verification page.
	pub user_code: String,
	/// Verification page.
	pub verification_uri: String,
	/// Verification page with the user code pre-filled, when offered.
	pub verification_uri_complete: Option<String>,
	/// Advisory lifetime of the code.
	pub expires_in: Duration,
	/// Advisory minimum delay between polls.
	pub interval: Duration,
	/// Local time the code was received.
	pub requested_at: OffsetDateTime,
}
impl DeviceCode {
	/// Advisory expiry instant, saturating at the calendar bounds.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.requested_at.saturating_add(self.expires_in)
	}

	/// Returns `true` once the advisory lifetime has elapsed at `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now >= self.expires_at()
	}

	/// Link to show the user; prefers the pre-filled variant.
	pub fn verification_link(&self) -> &str {
		self.verification_uri_complete.as_deref().unwrap_or(&self.verification_uri)
	}
}

/// Access token returned once the user approved the login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenSuccess {
	/// Bearer token for the portal and userinfo calls.
	pub access_token: TokenSecret,
	/// Token type, `Bearer` when omitted.
	pub token_type: String,
	/// Advisory lifetime, 300 s when omitted.
	pub expires_in: Duration,
}

/// Reason a poll did not yield a token. This is not an error.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PendingReason {
	/// The user has not approved the login yet.
	AuthorizationPending,
	/// The client polls too often.
	SlowDown,
	/// The device code expired; a new one is needed.
	ExpiredToken,
	/// The user declined the login.
	AccessDenied,
	/// Any other provider code, or a local code for unreadable/undelivered responses.
	Other(String),
}
impl PendingReason {
	/// Maps a provider `error` code.
	pub fn from_code(code: &str) -> Self {
		match code {
			"authorization_pending" => Self::AuthorizationPending,
			"slow_down" => Self::SlowDown,
			"expired_token" => Self::ExpiredToken,
			"access_denied" => Self::AccessDenied,
			other => Self::Other(other.to_owned()),
		}
	}

	/// The provider's `error` field, verbatim.
	pub fn as_str(&self) -> &str {
		match self {
			Self::AuthorizationPending => "authorization_pending",
			Self::SlowDown => "slow_down",
			Self::ExpiredToken => "expired_token",
			Self::AccessDenied => "access_denied",
			Self::Other(code) => code,
		}
	}

	/// Returns `true` when polling the same device code again is pointless.
	pub fn requires_restart(&self) -> bool {
		matches!(self, Self::ExpiredToken | Self::AccessDenied)
	}
}
impl Display for PendingReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Result of a single token poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenResult {
	/// The user approved; the token is ready.
	Success(TokenSuccess),
	/// Keep waiting, or restart when [`PendingReason::requires_restart`] says so.
	Pending(PendingReason),
}

#[derive(Deserialize)]
struct DeviceCodeBody {
	device_code: String,
	user_code: String,
	verification_uri: String,
	#[serde(default)]
	verification_uri_complete: Option<String>,
	#[serde(default, deserialize_with = "request::lenient_u64")]
	expires_in: Option<u64>,
	#[serde(default, deserialize_with = "request::lenient_u64")]
	interval: Option<u64>,
}

#[derive(Deserialize)]
struct TokenBody {
	access_token: String,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default, deserialize_with = "request::lenient_u64")]
	expires_in: Option<u64>,
}

/// Client for the device authorization grant and the userinfo endpoint.
pub struct DeviceGrantClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client wrapper used for every identity provider request.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors.
	pub transport_mapper: Arc<M>,
	/// Endpoints derived from the issuer.
	pub endpoints: OidcEndpoints,
	/// Public client identifier.
	pub client_id: String,
	/// Requested scopes.
	pub scopes: ScopeSet,
}
impl<C, M> DeviceGrantClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client for `descriptor` that reuses the caller-provided transport + mapper.
	pub fn with_http_client(
		descriptor: &ProvisioningDescriptor,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Result<Self, ConfigError> {
		Ok(Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			endpoints: descriptor.oidc_endpoints()?,
			client_id: descriptor.client_id.clone(),
			scopes: descriptor.scopes.clone(),
		})
	}

	/// Starts a device grant.
	///
	/// Fails with [`DeviceAuthError`] when the provider answers with an error status or a body
	/// without `device_code`; a partial code is never returned.
	pub async fn request_device_code(&self) -> Result<DeviceCode> {
		const KIND: FlowKind = FlowKind::DeviceAuthorization;

		let span = FlowSpan::new(KIND, "request_device_code");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let scope = self.scopes.to_form_value();
				let request = request::form_post(
					&self.endpoints.device_authorization,
					&[("client_id", self.client_id.as_str()), ("scope", scope.as_str())],
					IDP_TIMEOUT,
				)?;
				let requested_at = OffsetDateTime::now_utc();
				let response = self.execute(request).await?;

				parse_device_code(&response, requested_at)
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	/// Polls the token endpoint exactly once.
	///
	/// Never fails: transport failures and unreadable bodies become [`TokenResult::Pending`] so
	/// the user can retry.
	pub async fn poll_token_once(&self, code: &DeviceCode) -> TokenResult {
		const KIND: FlowKind = FlowKind::TokenPoll;

		let span = FlowSpan::new(KIND, "poll_token_once");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let request = match request::form_post(
					&self.endpoints.token,
					&[
						("grant_type", DEVICE_CODE_GRANT_TYPE),
						("client_id", self.client_id.as_str()),
						("device_code", code.device_code.expose()),
					],
					IDP_TIMEOUT,
				) {
					Ok(request) => request,
					Err(e) => {
						obs::flow_warning(KIND, &e);

						return TokenResult::Pending(PendingReason::Other(INVALID_RESPONSE.into()));
					},
				};

				match self.execute(request).await {
					Ok(response) => parse_token_poll(&response),
					Err(e) => {
						obs::flow_warning(KIND, &e);

						TokenResult::Pending(PendingReason::Other(TRANSPORT_ERROR.into()))
					},
				}
			})
			.await;

		match &result {
			TokenResult::Success(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			TokenResult::Pending(_) => obs::record_flow_outcome(KIND, FlowOutcome::Pending),
		}

		result
	}

	/// Fetches the owner's identity claims with `access_token`.
	pub async fn fetch_identity(&self, access_token: &TokenSecret) -> Result<Identity> {
		const KIND: FlowKind = FlowKind::Userinfo;

		let span = FlowSpan::new(KIND, "fetch_identity");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let request = request::json_request(
					Method::GET,
					&self.endpoints.userinfo,
					Some(access_token.expose()),
					None,
					IDP_TIMEOUT,
				)?;
				let response = self.execute(request).await?;

				if !response.is_success() {
					return Err(Error::from(UserinfoError {
						status: response.status,
						body: response.preview(USERINFO_PREVIEW_LIMIT),
					}));
				}

				response.json::<Identity>().map_err(|_| {
					Error::from(UserinfoError {
						status: response.status,
						body: response.preview(USERINFO_PREVIEW_LIMIT),
					})
				})
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	async fn execute(
		&self,
		request: oauth2::HttpRequest,
	) -> Result<RawResponse, crate::error::TransportError> {
		request::execute(self.http_client.as_ref(), self.transport_mapper.as_ref(), request).await
	}
}
#[cfg(feature = "reqwest")]
impl DeviceGrantClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a client backed by the default reqwest transport.
	pub fn new(descriptor: &ProvisioningDescriptor) -> Result<Self, ConfigError> {
		Self::with_http_client(
			descriptor,
			ReqwestHttpClient::without_redirects()?,
			ReqwestTransportErrorMapper,
		)
	}
}
impl<C, M> Clone for DeviceGrantClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			http_client: self.http_client.clone(),
			transport_mapper: self.transport_mapper.clone(),
			endpoints: self.endpoints.clone(),
			client_id: self.client_id.clone(),
			scopes: self.scopes.clone(),
		}
	}
}
impl<C, M> Debug for DeviceGrantClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DeviceGrantClient")
			.field("endpoints", &self.endpoints)
			.field("client_id", &self.client_id)
			.field("scopes", &self.scopes)
			.finish()
	}
}

fn parse_device_code(response: &RawResponse, requested_at: OffsetDateTime) -> Result<DeviceCode> {
	let loose = response.json_value().unwrap_or(JsonValue::Null);

	if response.status >= 400 || loose.get("device_code").is_none() {
		return Err(DeviceAuthError {
			status: response.status,
			error: request::string_field(&loose, "error").unwrap_or_else(|| UNKNOWN_ERROR.into()),
			description: request::string_field(&loose, "error_description")
				.unwrap_or_else(|| response.preview(ERROR_PREVIEW_LIMIT)),
		}
		.into());
	}

	let body = response.json::<DeviceCodeBody>().map_err(|e| DeviceAuthError {
		status: response.status,
		error: INVALID_RESPONSE.into(),
		description: format!("unexpected value at `{}`", e.path()),
	})?;

	Ok(DeviceCode {
		device_code: TokenSecret::new(body.device_code),
		user_code: body.user_code,
		verification_uri: body.verification_uri,
		verification_uri_complete: body.verification_uri_complete,
		expires_in: seconds(body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
		interval: seconds(body.interval.unwrap_or(DEFAULT_INTERVAL_SECS)),
		requested_at,
	})
}

fn parse_token_poll(response: &RawResponse) -> TokenResult {
	let Some(loose) = response.json_value() else {
		return TokenResult::Pending(PendingReason::Other(INVALID_RESPONSE.into()));
	};

	if loose.get("access_token").is_some() {
		return match serde_json::from_value::<TokenBody>(loose) {
			Ok(body) => TokenResult::Success(TokenSuccess {
				access_token: TokenSecret::new(body.access_token),
				token_type: body.token_type.unwrap_or_else(|| DEFAULT_TOKEN_TYPE.into()),
				expires_in: seconds(body.expires_in.unwrap_or(DEFAULT_TOKEN_EXPIRES_IN_SECS)),
			}),
			Err(_) => TokenResult::Pending(PendingReason::Other(INVALID_RESPONSE.into())),
		};
	}

	let code = request::string_field(&loose, "error").unwrap_or_else(|| UNKNOWN_ERROR.into());

	TokenResult::Pending(PendingReason::from_code(&code))
}

fn seconds(value: u64) -> Duration {
	Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn response(status: u16, body: &str) -> RawResponse {
		RawResponse { status, body: body.as_bytes().to_vec() }
	}

	#[test]
	fn device_code_defaults_apply() {
		let now = OffsetDateTime::now_utc();
		let code = parse_device_code(
			&response(
				200,
				r#"{"device_code":"dc","user_code":"ABCD-EFGH","verification_uri":"https://id/device"}"#,
			),
			now,
		)
		.expect("Minimal device code should parse.");

		assert_eq!(code.expires_in, Duration::seconds(600));
		assert_eq!(code.interval, Duration::seconds(5));
		assert_eq!(code.verification_link(), "https://id/device");
		assert!(!code.is_expired_at(now));
		assert!(code.is_expired_at(now + Duration::seconds(600)));
	}

	#[test]
	fn oversized_lifetimes_saturate() {
		let now = OffsetDateTime::now_utc();
		let code = parse_device_code(
			&response(
				200,
				r#"{"device_code":"dc","user_code":"A","verification_uri":"https://id/device","expires_in":99999999999999,"interval":18446744073709551615}"#,
			),
			now,
		)
		.expect("Large advisory values should parse.");

		assert!(code.expires_at() > now);
		assert!(!code.is_expired_at(now + Duration::days(365)));
		assert_eq!(code.interval, Duration::seconds(i64::MAX));
	}

	#[test]
	fn device_code_errors_prefer_provider_fields() {
		let err = parse_device_code(
			&response(400, r#"{"error":"invalid_client","error_description":"Unknown client"}"#),
			OffsetDateTime::now_utc(),
		)
		.expect_err("Error status should fail.");

		assert!(matches!(
			err,
			Error::DeviceAuth(DeviceAuthError { status: 400, ref error, ref description })
				if error == "invalid_client" && description == "Unknown client"
		));
	}

	#[test]
	fn device_code_errors_fall_back_to_body_preview() {
		let body = "x".repeat(500);
		let err = parse_device_code(&response(502, &body), OffsetDateTime::now_utc())
			.expect_err("Non-JSON body should fail.");

		let Error::DeviceAuth(err) = err else { panic!("Expected a device auth error.") };

		assert_eq!(err.error, "unknown_error");
		assert_eq!(err.description.len(), 300);
	}

	#[test]
	fn success_status_without_device_code_is_rejected() {
		let err = parse_device_code(&response(200, r#"{"user_code":"A"}"#), OffsetDateTime::now_utc())
			.expect_err("Missing device_code should fail.");

		assert!(matches!(err, Error::DeviceAuth(DeviceAuthError { status: 200, .. })));
	}

	#[test]
	fn token_poll_maps_every_shape() {
		assert_eq!(
			parse_token_poll(&response(400, r#"{"error":"slow_down"}"#)),
			TokenResult::Pending(PendingReason::SlowDown)
		);
		assert_eq!(
			parse_token_poll(&response(400, r#"{"error":"invalid_grant"}"#)),
			TokenResult::Pending(PendingReason::Other("invalid_grant".into()))
		);
		assert_eq!(
			parse_token_poll(&response(400, "{}")),
			TokenResult::Pending(PendingReason::Other("unknown_error".into()))
		);
		assert_eq!(
			parse_token_poll(&response(502, "<html>")),
			TokenResult::Pending(PendingReason::Other("invalid_response".into()))
		);

		let TokenResult::Success(success) =
			parse_token_poll(&response(200, r#"{"access_token":"at"}"#))
		else {
			panic!("Access token should yield success.");
		};

		assert_eq!(success.access_token.expose(), "at");
		assert_eq!(success.token_type, "Bearer");
		assert_eq!(success.expires_in, Duration::seconds(300));
	}

	#[test]
	fn pending_reasons_round_trip_codes() {
		for code in ["authorization_pending", "slow_down", "expired_token", "access_denied", "x"] {
			assert_eq!(PendingReason::from_code(code).as_str(), code);
		}

		assert!(PendingReason::ExpiredToken.requires_restart());
		assert!(!PendingReason::AuthorizationPending.requires_restart());
	}
}
