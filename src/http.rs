//! Transport primitives shared by the identity, portal, and management clients.
//!
//! The module exposes [`HttpTransport`] alongside [`ResponseMetadata`] and
//! [`ResponseMetadataSlot`] so hosts can plug in their own HTTP stack without losing the
//! error classification performed by [`TransportErrorMapper`]. Every request built by this
//! crate carries a [`RequestTimeout`] extension; transports are expected to honor it.

pub mod mapper;

pub(crate) mod request;

pub use mapper::*;
pub use oauth2;

// std
use std::{ops::Deref, time::Duration as StdDuration};
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
// self
use crate::_prelude::*;

/// Abstraction over HTTP transports used by every outbound call in the crate.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by the
/// device grant, portal, and management clients. Each call receives a short-lived
/// [`AsyncHttpClient`] handle tied to a fresh [`ResponseMetadataSlot`].
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// [`AsyncHttpClient`] handle tied to a [`ResponseMetadataSlot`].
	///
	/// The request future returned by [`AsyncHttpClient::call`] must be `Send` so provisioning
	/// futures can hop executors.
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds an [`AsyncHttpClient`] handle that records outcomes in `slot`.
	///
	/// # Metadata Contract
	///
	/// - Call [`ResponseMetadataSlot::take`] before submitting the request.
	/// - Once a response status is known, save it with [`ResponseMetadataSlot::store`].
	/// - Apply the [`RequestTimeout`] extension when the request carries one.
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Per-request deadline attached to outbound requests as an [`oauth2::http`] extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestTimeout(pub StdDuration);
impl RequestTimeout {
	/// Builds a timeout from whole seconds.
	pub const fn from_secs(secs: u64) -> Self {
		Self(StdDuration::from_secs(secs))
	}

	/// Reads the timeout carried by `request`, if any.
	pub fn of(request: &HttpRequest) -> Option<StdDuration> {
		request.extensions().get::<Self>().map(|timeout| timeout.0)
	}
}

/// Captures metadata from the most recent HTTP response for downstream error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the remote endpoint, if available.
	pub status: Option<u16>,
	/// Wall-clock time between dispatch and the response head.
	pub elapsed: Option<Duration>,
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between transport and error layers.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Portal and identity endpoints answer directly; configure any custom [`ReqwestClient`] to
/// disable redirect following.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client that never follows redirects.
	pub fn without_redirects() -> Result<Self, crate::error::ConfigError> {
		let client = ReqwestClient::builder().redirect(reqwest::redirect::Policy::none()).build()?;

		Ok(Self(client))
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestHttpClient {
	type Handle = InstrumentedHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		InstrumentedHandle(Arc::new(InstrumentedHttpClient { client: self.0.clone(), slot }))
	}
}

#[cfg(feature = "reqwest")]
struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// Handle returned by [`ReqwestHttpClient`] that satisfies [`HttpTransport`].
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			// Extensions do not survive the conversion into a reqwest request.
			let timeout = RequestTimeout::of(&request);
			let mut outbound: reqwest::Request = request.try_into().map_err(Box::new)?;

			*outbound.timeout_mut() = timeout;

			let started = OffsetDateTime::now_utc();
			let response = client.client.execute(outbound).await.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();

			client.slot.store(ResponseMetadata {
				status: Some(status.as_u16()),
				elapsed: Some(OffsetDateTime::now_utc() - started),
			});

			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}
