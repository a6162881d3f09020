// std
use std::{borrow::Cow, time::Duration as StdDuration};
// crates.io
use oauth2::{
	AsyncHttpClient, HttpRequest, HttpResponse,
	http::{
		HeaderValue, Method, Request,
		header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
	},
};
use serde::{Deserializer, de::Error as DeError};
use url::form_urlencoded::Serializer;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransportError},
	http::{HttpTransport, RequestTimeout, ResponseMetadataSlot, TransportErrorMapper},
};

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";

/// Builds a form-encoded POST.
pub(crate) fn form_post(
	url: &Url,
	fields: &[(&str, &str)],
	timeout: StdDuration,
) -> Result<HttpRequest, ConfigError> {
	let mut body = Serializer::new(String::new());

	for (key, value) in fields {
		body.append_pair(key, value);
	}

	Ok(Request::builder()
		.method(Method::POST)
		.uri(url.as_str())
		.header(CONTENT_TYPE, HeaderValue::from_static(FORM))
		.header(ACCEPT, HeaderValue::from_static(JSON))
		.extension(RequestTimeout(timeout))
		.body(body.finish().into_bytes())?)
}

/// Builds a JSON request, optionally authenticated with a bearer token.
pub(crate) fn json_request(
	method: Method,
	url: &Url,
	bearer: Option<&str>,
	body: Option<&JsonValue>,
	timeout: StdDuration,
) -> Result<HttpRequest, ConfigError> {
	let mut builder = Request::builder()
		.method(method)
		.uri(url.as_str())
		.header(ACCEPT, HeaderValue::from_static(JSON))
		.extension(RequestTimeout(timeout));

	if let Some(token) = bearer {
		builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
	}

	let payload = match body {
		Some(value) => {
			builder = builder.header(CONTENT_TYPE, HeaderValue::from_static(JSON));

			serde_json::to_vec(value).map_err(|source| ConfigError::RequestBody { source })?
		},
		None => Vec::new(),
	};

	Ok(builder.body(payload)?)
}

/// Buffered response as seen by the API clients.
#[derive(Clone, Debug)]
pub(crate) struct RawResponse {
	pub(crate) status: u16,
	pub(crate) body: Vec<u8>,
}
impl RawResponse {
	pub(crate) fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	pub(crate) fn is_auth_failure(&self) -> bool {
		matches!(self.status, 401 | 403)
	}

	pub(crate) fn text(&self) -> Cow<'_, str> {
		String::from_utf8_lossy(&self.body)
	}

	pub(crate) fn is_blank(&self) -> bool {
		self.body.iter().all(u8::is_ascii_whitespace)
	}

	/// Parses the body, reporting the failing field path on schema mismatches.
	pub(crate) fn json<T>(&self) -> Result<T, serde_path_to_error::Error<serde_json::Error>>
	where
		T: DeserializeOwned,
	{
		let mut deserializer = serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(&mut deserializer)
	}

	/// Parses the body as loose JSON, returning `None` when it is not JSON at all.
	pub(crate) fn json_value(&self) -> Option<JsonValue> {
		serde_json::from_slice(&self.body).ok()
	}

	pub(crate) fn preview(&self, limit: usize) -> String {
		truncate_preview(&self.text(), limit)
	}
}
impl From<HttpResponse> for RawResponse {
	fn from(response: HttpResponse) -> Self {
		let status = response.status().as_u16();

		Self { status, body: response.into_body() }
	}
}

/// Dispatches `request` through the transport and buffers the response.
pub(crate) async fn execute<C, M>(
	client: &C,
	mapper: &M,
	request: HttpRequest,
) -> Result<RawResponse, TransportError>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let slot = ResponseMetadataSlot::default();
	let handle = client.with_metadata(slot.clone());
	let target = request.uri().to_string();

	match handle.call(request).await {
		Ok(response) => Ok(response.into()),
		Err(e) => {
			let meta = slot.take();

			Err(mapper.map_transport_error(&target, meta.as_ref(), e))
		},
	}
}

/// Truncates `text` to at most `limit` characters.
pub(crate) fn truncate_preview(text: &str, limit: usize) -> String {
	match text.char_indices().nth(limit) {
		Some((cut, _)) => text[..cut].to_owned(),
		None => text.to_owned(),
	}
}

/// Accepts unsigned integers sent as JSON numbers, integral floats, or numeric strings.
pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
	D: Deserializer<'de>,
{
	match Option::<JsonValue>::deserialize(deserializer)? {
		None | Some(JsonValue::Null) => Ok(None),
		Some(JsonValue::Number(number)) => number
			.as_u64()
			.or_else(|| {
				number.as_f64().filter(|v| v.fract() == 0.0 && *v >= 0.0).map(|v| v as u64)
			})
			.map(Some)
			.ok_or_else(|| DeError::custom(format!("expected an unsigned integer, got {number}"))),
		Some(JsonValue::String(raw)) => raw.trim().parse().map(Some).map_err(DeError::custom),
		Some(other) =>
			Err(DeError::custom(format!("expected an unsigned integer, got {other}"))),
	}
}

/// Accepts booleans sent as JSON booleans, `0`/`1`, or `"true"`/`"false"`.
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
	D: Deserializer<'de>,
{
	match Option::<JsonValue>::deserialize(deserializer)? {
		None | Some(JsonValue::Null) => Ok(None),
		Some(JsonValue::Bool(flag)) => Ok(Some(flag)),
		Some(JsonValue::Number(number)) => match number.as_u64() {
			Some(0) => Ok(Some(false)),
			Some(1) => Ok(Some(true)),
			_ => Err(DeError::custom(format!("expected a boolean, got {number}"))),
		},
		Some(JsonValue::String(raw)) => match raw.trim().to_ascii_lowercase().as_str() {
			"true" | "1" => Ok(Some(true)),
			"false" | "0" => Ok(Some(false)),
			_ => Err(DeError::custom(format!("expected a boolean, got {raw:?}"))),
		},
		Some(other) => Err(DeError::custom(format!("expected a boolean, got {other}"))),
	}
}

/// Reads `key` as text; non-string scalars are rendered, `null` counts as absent.
pub(crate) fn string_field(value: &JsonValue, key: &str) -> Option<String> {
	match value.get(key)? {
		JsonValue::Null => None,
		JsonValue::String(text) => Some(text.clone()),
		other => Some(other.to_string()),
	}
}

/// Joins `path` onto `base`, keeping any path prefix `base` already has.
pub(crate) fn join_path(base: &Url, path: &str) -> Url {
	let mut url = base.clone();
	let joined = format!("{}/{}", base.path().trim_end_matches('/'), path.trim_start_matches('/'));

	url.set_path(&joined);

	url
}
