//! Ordered OIDC scope list requested during the device grant.

// std
use std::slice::Iter;
// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError};
// self
use crate::_prelude::*;

/// Scopes requested when the host does not override them.
pub const DEFAULT_SCOPES: [&str; 3] = ["openid", "profile", "email"];

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
	/// Identity claims are only served for `openid` requests.
	#[error("Scope list must include `openid`.")]
	MissingOpenId,
}

/// Deduplicated scope list that keeps the caller's order.
///
/// Serialized as the space-delimited string sent in the `scope` form field.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ScopeSet {
	scopes: Vec<String>,
}
impl ScopeSet {
	/// Creates a scope list from any iterator; duplicates keep their first position.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut normalized = Vec::<String>::new();

		for scope in scopes {
			let owned: String = scope.into();

			if owned.is_empty() {
				return Err(ScopeValidationError::Empty);
			}
			if owned.chars().any(char::is_whitespace) {
				return Err(ScopeValidationError::ContainsWhitespace { scope: owned });
			}
			if !normalized.contains(&owned) {
				normalized.push(owned);
			}
		}
		if !normalized.iter().any(|scope| scope == "openid") {
			return Err(ScopeValidationError::MissingOpenId);
		}

		Ok(Self { scopes: normalized })
	}

	/// Returns true if the list contains `scope`.
	pub fn contains(&self, scope: &str) -> bool {
		self.scopes.iter().any(|candidate| candidate == scope)
	}

	/// Iterator over scopes in request order.
	pub fn iter(&self) -> Iter<'_, String> {
		self.scopes.iter()
	}

	/// Space-delimited form value.
	pub fn to_form_value(&self) -> String {
		self.scopes.join(" ")
	}
}
impl Default for ScopeSet {
	fn default() -> Self {
		Self { scopes: DEFAULT_SCOPES.iter().map(|scope| (*scope).to_owned()).collect() }
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.scopes).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.to_form_value())
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.trim().is_empty() {
			return Err(ScopeValidationError::Empty);
		}

		Self::new(s.split_whitespace())
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_form_value())
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		raw.parse().map_err(DeError::custom)
	}
}
