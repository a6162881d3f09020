//! Client for the host platform's Supervisor-style management API.
//!
//! Every call is a bearer-authenticated JSON request against the management base URL. Responses
//! wrapped in the `{"result": ..., "data": ...}` envelope are unwrapped; mutating endpoints may
//! answer with an empty body. Any failure collapses into a single [`ManagementApiError`] that
//! names the method and path.

pub mod types;

pub use types::*;

// std
use std::time::Duration as StdDuration;
// crates.io
use oauth2::http::Method;
// self
use crate::{
	_prelude::*,
	auth::{ComponentId, TokenSecret},
	config::ManagementConfig,
	error::ManagementApiError,
	http::{
		HttpTransport, TransportErrorMapper,
		request::{self, RawResponse},
	},
};
#[cfg(feature = "reqwest")]
use crate::{
	error::ConfigError,
	http::{ReqwestHttpClient, ReqwestTransportErrorMapper},
};

const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_secs(20);
const HOST_RESTART_TIMEOUT: StdDuration = StdDuration::from_secs(30);
const ERROR_PREVIEW_LIMIT: usize = 400;

#[cfg(feature = "reqwest")]
/// Management client specialized for the crate's default reqwest transport stack.
pub type ReqwestManagementClient =
	ManagementClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Management API client.
///
/// The client is stateless between calls; every method performs exactly one request.
pub struct ManagementClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client wrapper used for every management request.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors.
	pub transport_mapper: Arc<M>,
	base_url: Url,
	token: TokenSecret,
}
impl<C, M> ManagementClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a management client that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		config: ManagementConfig,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			base_url: config.base_url,
			token: config.token,
		}
	}

	/// Base URL every path is resolved against.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Lists installed components (`GET /addons`).
	pub async fn list(&self) -> Result<Vec<AddonSummary>, ManagementApiError> {
		let list: AddonList = self.fetch(Method::GET, "/addons").await?;

		Ok(list.addons)
	}

	/// Reads the component's info (`GET /addons/{slug}/info`).
	pub async fn info(&self, component: &ComponentId) -> Result<AddonInfo, ManagementApiError> {
		self.fetch(Method::GET, &format!("/addons/{component}/info")).await
	}

	/// Reads the component's current option map.
	pub async fn options(
		&self,
		component: &ComponentId,
	) -> Result<JsonMap<String, JsonValue>, ManagementApiError> {
		Ok(self.info(component).await?.options)
	}

	/// Replaces the component's options (`POST /addons/{slug}/options`).
	pub async fn set_options(
		&self,
		component: &ComponentId,
		options: &JsonMap<String, JsonValue>,
	) -> Result<(), ManagementApiError> {
		let body = serde_json::json!({ "options": options });
		let path = format!("/addons/{component}/options");

		self.call(Method::POST, &path, Some(&body), DEFAULT_TIMEOUT).await.map(drop)
	}

	/// Restarts the component (`POST /addons/{slug}/restart`).
	pub async fn restart(&self, component: &ComponentId) -> Result<(), ManagementApiError> {
		self.post_empty(&format!("/addons/{component}/restart"), DEFAULT_TIMEOUT).await
	}

	/// Starts the component (`POST /addons/{slug}/start`).
	pub async fn start(&self, component: &ComponentId) -> Result<(), ManagementApiError> {
		self.post_empty(&format!("/addons/{component}/start"), DEFAULT_TIMEOUT).await
	}

	/// Restarts the host application core (`POST /core/restart`).
	pub async fn restart_host(&self) -> Result<(), ManagementApiError> {
		self.call(Method::POST, "/core/restart", None, HOST_RESTART_TIMEOUT).await.map(drop)
	}

	async fn post_empty(&self, path: &str, timeout: StdDuration) -> Result<(), ManagementApiError> {
		let body = JsonValue::Object(JsonMap::new());

		self.call(Method::POST, path, Some(&body), timeout).await.map(drop)
	}

	async fn fetch<T>(&self, method: Method, path: &str) -> Result<T, ManagementApiError>
	where
		T: DeserializeOwned,
	{
		let verb = method.as_str().to_owned();
		let (status, data) = self.call(method, path, None, DEFAULT_TIMEOUT).await?;

		serde_path_to_error::deserialize(data)
			.map_err(|e| ManagementApiError::malformed(&verb, path, status, e))
	}

	/// Performs one request and returns the status plus the unwrapped `data` payload.
	async fn call(
		&self,
		method: Method,
		path: &str,
		body: Option<&JsonValue>,
		timeout: StdDuration,
	) -> Result<(u16, JsonValue), ManagementApiError> {
		let verb = method.as_str().to_owned();
		let url = request::join_path(&self.base_url, path);
		let outgoing =
			request::json_request(method, &url, Some(self.token.expose()), body, timeout)
				.map_err(|e| ManagementApiError::config(&verb, path, e))?;
		let response =
			request::execute(self.http_client.as_ref(), self.transport_mapper.as_ref(), outgoing)
				.await
				.map_err(|e| ManagementApiError::transport(&verb, path, e))?;

		if !response.is_success() {
			return Err(ManagementApiError::status(
				&verb,
				path,
				response.status,
				response.preview(ERROR_PREVIEW_LIMIT),
			));
		}

		unwrap_envelope(&verb, path, &response).map(|data| (response.status, data))
	}
}
#[cfg(feature = "reqwest")]
impl ManagementClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a management client backed by the default reqwest transport.
	pub fn new(config: ManagementConfig) -> Result<Self, ConfigError> {
		Ok(Self::with_http_client(
			config,
			ReqwestHttpClient::without_redirects()?,
			ReqwestTransportErrorMapper,
		))
	}
}
impl<C, M> Clone for ManagementClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			http_client: self.http_client.clone(),
			transport_mapper: self.transport_mapper.clone(),
			base_url: self.base_url.clone(),
			token: self.token.clone(),
		}
	}
}
impl<C, M> Debug for ManagementClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ManagementClient")
			.field("base_url", &self.base_url)
			.field("token", &self.token)
			.finish()
	}
}

/// Unwraps `{"result", "data"}`; a blank body yields `null`.
fn unwrap_envelope(
	method: &str,
	path: &str,
	response: &RawResponse,
) -> Result<JsonValue, ManagementApiError> {
	if response.is_blank() {
		return Ok(JsonValue::Null);
	}

	let value: JsonValue = response
		.json()
		.map_err(|e| ManagementApiError::malformed(method, path, response.status, e))?;

	match value.get("result").and_then(JsonValue::as_str) {
		Some("ok") | None => {},
		Some(_) => {
			let message = request::string_field(&value, "message")
				.unwrap_or_else(|| response.preview(ERROR_PREVIEW_LIMIT));

			return Err(ManagementApiError::status(method, path, response.status, message));
		},
	}

	Ok(match value {
		JsonValue::Object(mut envelope) => match envelope.remove("data") {
			Some(data) => data,
			None => JsonValue::Object(envelope),
		},
		other => other,
	})
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn response(status: u16, body: &str) -> RawResponse {
		RawResponse { status, body: body.as_bytes().to_vec() }
	}

	#[test]
	fn envelope_unwraps_data() {
		let data = unwrap_envelope(
			"GET",
			"/addons",
			&response(200, r#"{"result":"ok","data":{"addons":[]}}"#),
		)
		.expect("Envelope should unwrap.");

		assert_eq!(data, serde_json::json!({ "addons": [] }));
	}

	#[test]
	fn blank_body_is_accepted() {
		let data = unwrap_envelope("POST", "/addons/x/restart", &response(200, "  "))
			.expect("Blank bodies should be accepted.");

		assert_eq!(data, JsonValue::Null);
	}

	#[test]
	fn error_result_is_reported_with_message() {
		let err = unwrap_envelope(
			"POST",
			"/addons/x/options",
			&response(200, r#"{"result":"error","message":"invalid option"}"#),
		)
		.expect_err("Error envelopes should fail.");

		assert_eq!(err.status, Some(200));
		assert_eq!(err.to_string(), "POST /addons/x/options failed: HTTP 200 - invalid option.");
	}

	#[test]
	fn non_json_success_body_is_malformed() {
		let err = unwrap_envelope("GET", "/addons", &response(200, "<html>"))
			.expect_err("HTML should be rejected.");

		assert!(err.detail.starts_with("unexpected response body"));
	}
}
