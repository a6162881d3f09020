//! Provisioning error taxonomy shared by the identity, portal, and management layers.

// self
use crate::{_prelude::*, portal::PortalOperation};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// The identity provider refused to start the device grant.
	#[error(transparent)]
	DeviceAuth(#[from] DeviceAuthError),
	/// Userinfo lookup failed.
	#[error(transparent)]
	Userinfo(#[from] UserinfoError),
	/// The portal rejected the caller's credentials; re-authentication is required.
	#[error(transparent)]
	PortalAuth(#[from] PortalAuthError),
	/// Generic portal failure; retry later.
	#[error(transparent)]
	PortalApi(#[from] PortalApiError),
	/// Local management API failure.
	#[error(transparent)]
	ManagementApi(#[from] ManagementApiError),
	/// The managed component could not be located or updated.
	#[error(transparent)]
	Reconcile(#[from] ReconcileError),
}
impl Error {
	/// Returns `true` when the caller should route to re-authentication instead of retrying.
	pub fn requires_reauthentication(&self) -> bool {
		matches!(self, Error::PortalAuth(_))
	}
}

/// Configuration and request-construction failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A derived endpoint URL could not be parsed.
	#[error("The {endpoint} endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Endpoint label.
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	RequestBody {
		/// Underlying serialization failure.
		#[source]
		source: serde_json::Error,
	},
	/// Management API token is not available in the environment.
	#[error("Environment variable `{variable}` is not set; management API is unavailable.")]
	MissingManagementToken {
		/// Environment variable that was consulted.
		variable: &'static str,
	},
	/// Descriptor validation failed.
	#[error(transparent)]
	Descriptor(#[from] crate::config::DescriptorError),
	/// Identifier validation failed.
	#[error(transparent)]
	Identifier(#[from] crate::auth::IdentifierError),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO, timeouts).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {target}.")]
	Network {
		/// Host or URL that was being called.
		target: String,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The per-request timeout elapsed.
	#[error("Request to {target} timed out.")]
	Timeout {
		/// Host or URL that was being called.
		target: String,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
	/// The transport refused the request before dispatching it.
	#[error("Transport rejected the request.")]
	InvalidRequest {
		/// Underlying request conversion failure.
		#[source]
		source: BoxError,
	},
	/// Any other client-reported failure.
	#[error("HTTP client error: {message}.")]
	Other {
		/// Client-supplied message.
		message: String,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(
		target: impl Into<String>,
		src: impl 'static + Send + Sync + std::error::Error,
	) -> Self {
		Self::Network { target: target.into(), source: Box::new(src) }
	}
}

/// The identity provider refused the device authorization request.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Device authorization failed (HTTP {status}): {error} - {description}.")]
pub struct DeviceAuthError {
	/// HTTP status returned by the identity provider.
	pub status: u16,
	/// Provider `error` code, or `unknown_error`.
	pub error: String,
	/// Provider `error_description`, or a preview of the raw body.
	pub description: String,
}

/// The userinfo endpoint answered with an error or an unreadable body.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Userinfo lookup failed (HTTP {status}): {body}.")]
pub struct UserinfoError {
	/// HTTP status returned by the identity provider.
	pub status: u16,
	/// Truncated response body.
	pub body: String,
}

/// Portal rejected the supplied bearer credential (HTTP 401/403).
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Portal rejected the {operation} request (HTTP {status}).")]
pub struct PortalAuthError {
	/// Operation that was rejected.
	pub operation: PortalOperation,
	/// HTTP status (401 or 403).
	pub status: u16,
	/// Portal-supplied `error` field, when present.
	pub reason: Option<String>,
}

/// Generic portal failure.
#[derive(Debug, ThisError)]
pub enum PortalApiError {
	/// Portal answered with an unexpected HTTP status.
	#[error("Portal {operation} request failed (HTTP {status}): {body}.")]
	Status {
		/// Operation that failed.
		operation: PortalOperation,
		/// HTTP status code.
		status: u16,
		/// Truncated response body.
		body: String,
	},
	/// Portal could not be reached.
	#[error("Portal {operation} request could not be delivered.")]
	Transport {
		/// Operation that failed.
		operation: PortalOperation,
		/// Underlying transport failure.
		#[source]
		source: TransportError,
	},
	/// Portal response body did not match the expected schema.
	#[error("Portal {operation} response is malformed.")]
	Malformed {
		/// Operation that failed.
		operation: PortalOperation,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Portal answered `ok: false`.
	#[error("Portal {operation} request was refused: {message}.")]
	Rejected {
		/// Operation that failed.
		operation: PortalOperation,
		/// Portal-supplied error or the raw payload.
		message: String,
	},
	/// A required field was missing from an otherwise valid payload.
	#[error("Portal {operation} response is missing `{field}`.")]
	MissingField {
		/// Operation that failed.
		operation: PortalOperation,
		/// Missing field name.
		field: &'static str,
	},
}
impl PortalApiError {
	/// Returns the operation that produced this error.
	pub fn operation(&self) -> PortalOperation {
		match self {
			Self::Status { operation, .. }
			| Self::Transport { operation, .. }
			| Self::Malformed { operation, .. }
			| Self::Rejected { operation, .. }
			| Self::MissingField { operation, .. } => *operation,
		}
	}
}

/// Failure reported by the local management API.
///
/// Callers only learn that an operation failed; the HTTP status and a truncated body are kept
/// for diagnostics.
#[derive(Debug, ThisError)]
#[error("{method} {path} failed: {detail}.")]
pub struct ManagementApiError {
	/// HTTP method of the failing call.
	pub method: String,
	/// Path of the failing call, relative to the management API base.
	pub path: String,
	/// HTTP status, when a response was received.
	pub status: Option<u16>,
	/// Human-readable detail (status + truncated body, or the transport failure).
	pub detail: String,
	/// Underlying failure, when one exists.
	#[source]
	pub source: Option<BoxError>,
}
impl ManagementApiError {
	pub(crate) fn status(method: &str, path: &str, status: u16, body: String) -> Self {
		Self {
			method: method.to_owned(),
			path: path.to_owned(),
			status: Some(status),
			detail: format!("HTTP {status} - {body}"),
			source: None,
		}
	}

	pub(crate) fn transport(method: &str, path: &str, err: TransportError) -> Self {
		Self {
			method: method.to_owned(),
			path: path.to_owned(),
			status: None,
			detail: err.to_string(),
			source: Some(Box::new(err)),
		}
	}

	pub(crate) fn malformed(
		method: &str,
		path: &str,
		status: u16,
		err: serde_path_to_error::Error<serde_json::Error>,
	) -> Self {
		Self {
			method: method.to_owned(),
			path: path.to_owned(),
			status: Some(status),
			detail: format!("unexpected response body at `{}`", err.path()),
			source: Some(Box::new(err)),
		}
	}

	pub(crate) fn config(method: &str, path: &str, err: ConfigError) -> Self {
		Self {
			method: method.to_owned(),
			path: path.to_owned(),
			status: None,
			detail: err.to_string(),
			source: Some(Box::new(err)),
		}
	}
}

/// Reconciliation failures.
#[derive(Debug, ThisError)]
pub enum ReconcileError {
	/// No installed component matched the selector.
	#[error("Could not locate a component matching {selector}.")]
	ComponentNotFound {
		/// Selector description.
		selector: String,
		/// Management failure that prevented the lookup, if any.
		#[source]
		source: Option<ManagementApiError>,
	},
	/// The component was located but reading or updating it failed.
	#[error("Could not apply options to component `{component}`.")]
	Apply {
		/// Component identifier.
		component: String,
		/// Underlying management failure.
		#[source]
		source: ManagementApiError,
	},
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn only_portal_auth_requires_reauthentication() {
		let auth: Error = PortalAuthError {
			operation: PortalOperation::Enroll,
			status: 401,
			reason: None,
		}
		.into();
		let api: Error = PortalApiError::Status {
			operation: PortalOperation::Enroll,
			status: 500,
			body: "boom".into(),
		}
		.into();

		assert!(auth.requires_reauthentication());
		assert!(!api.requires_reauthentication());
		assert_eq!(auth.to_string(), "Portal rejected the enroll request (HTTP 401).");
	}

	#[test]
	fn reconcile_error_exposes_management_source() {
		let inner = ManagementApiError::status("GET", "/addons", 502, "bad gateway".into());
		let err = ReconcileError::ComponentNotFound {
			selector: "slug `frpc`".into(),
			source: Some(inner),
		};
		let source = StdError::source(&err).expect("Lookup failure should keep its source.");

		assert_eq!(source.to_string(), "GET /addons failed: HTTP 502 - bad gateway.");
	}
}
