//! Identity claims kept from the userinfo endpoint.

// self
use crate::_prelude::*;

/// Owner identity as reported by the identity provider.
///
/// Only `sub`, `email`, `preferred_username`, and `name` are retained; every other claim is
/// discarded on deserialization.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	/// Stable subject identifier (`sub`).
	#[serde(rename = "sub", default)]
	pub subject: Option<String>,
	/// Email address (`email`).
	#[serde(default)]
	pub email: Option<String>,
	/// Login name (`preferred_username`).
	#[serde(default)]
	pub preferred_username: Option<String>,
	/// Display name (`name`).
	#[serde(rename = "name", default)]
	pub display_name: Option<String>,
}
impl Identity {
	/// Returns `true` when no claim was captured (for example after a failed lookup).
	pub fn is_empty(&self) -> bool {
		self.subject.is_none()
			&& self.email.is_none()
			&& self.preferred_username.is_none()
			&& self.display_name.is_none()
	}

	/// Best label for display: display name, then username, then email.
	pub fn label(&self) -> Option<&str> {
		self.display_name
			.as_deref()
			.or(self.preferred_username.as_deref())
			.or(self.email.as_deref())
	}
}
