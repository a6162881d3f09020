//! Classification of transport failures into [`TransportError`] values.

// crates.io
use oauth2::HttpClientError;
// self
use crate::{_prelude::*, error::TransportError, http::ResponseMetadata};

/// Maps HTTP transport failures into crate [`TransportError`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport while calling `target`.
	fn map_transport_error(
		&self,
		target: &str,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> TransportError;
}

/// Mapper for arbitrary transports; every client failure is treated as a network error.
#[derive(Clone, Debug, Default)]
pub struct GenericTransportErrorMapper;
impl<E> TransportErrorMapper<E> for GenericTransportErrorMapper
where
	E: 'static + Send + Sync + StdError,
{
	fn map_transport_error(
		&self,
		target: &str,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<E>,
	) -> TransportError {
		match err {
			HttpClientError::Reqwest(inner) => TransportError::network(target, *inner),
			other => map_common(target, meta, other),
		}
	}
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		target: &str,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> TransportError {
		match err {
			HttpClientError::Reqwest(inner) if inner.is_builder() =>
				TransportError::InvalidRequest { source: inner },
			HttpClientError::Reqwest(inner) if inner.is_timeout() =>
				TransportError::Timeout { target: target.to_owned() },
			HttpClientError::Reqwest(inner) => TransportError::network(target, *inner),
			other => map_common(target, meta, other),
		}
	}
}

fn map_common<E>(
	target: &str,
	meta: Option<&ResponseMetadata>,
	err: HttpClientError<E>,
) -> TransportError
where
	E: 'static + Send + Sync + StdError,
{
	match err {
		HttpClientError::Http(inner) => TransportError::InvalidRequest { source: Box::new(inner) },
		HttpClientError::Io(inner) if inner.kind() == std::io::ErrorKind::TimedOut =>
			TransportError::Timeout { target: target.to_owned() },
		HttpClientError::Io(inner) => TransportError::Io(inner),
		HttpClientError::Other(message) => TransportError::Other { message: describe(meta, message) },
		HttpClientError::Reqwest(inner) => TransportError::network(target, *inner),
		_ => TransportError::Other { message: describe(meta, "unknown transport failure".into()) },
	}
}

fn describe(meta: Option<&ResponseMetadata>, message: String) -> String {
	match meta.and_then(|value| value.status) {
		Some(status) => format!("{message} (HTTP {status})"),
		None => message,
	}
}
