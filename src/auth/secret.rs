//! Redacted wrapper for bearer tokens, device codes, and tunnel secrets.

// self
use crate::_prelude::*;

/// Secret string that never prints its value.
///
/// Serializes transparently so hosts can persist records holding it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Wraps `value` unless it is empty or whitespace.
	pub fn non_empty(value: impl Into<String>) -> Option<Self> {
		let value = value.into();

		if value.trim().is_empty() { None } else { Some(Self(value)) }
	}

	/// Returns the inner value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}
