//! Validated identifiers for hubs, local devices, and managed components.

// std
use std::{borrow::Borrow, ops::Deref};
// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;
const DEVICE_UID_PREFIX: &str = "hub-";
const DEVICE_UID_RANDOM_LEN: usize = 24;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (hub, device, component).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (hub, device, component).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed length.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (hub, device, component).
		kind: &'static str,
		/// Maximum permitted length.
		max: usize,
	},
}

def_id! { HubId, "Portal-assigned identifier of an enrolled hub (`ha_uuid` on the wire).", "Hub" }
def_id! { DeviceUid, "Stable, locally generated identifier of the hub device.", "Device" }
def_id! { ComponentId, "Management API slug of an installed add-on.", "Component" }

impl DeviceUid {
	/// Generates a fresh random identifier for a first-time setup.
	///
	/// The host must persist the value; re-enrolling with a different identifier registers a new
	/// device with the portal.
	pub fn generate() -> Self {
		let suffix: String = rand::rng()
			.sample_iter(Alphanumeric)
			.take(DEVICE_UID_RANDOM_LEN)
			.map(|byte| char::from(byte).to_ascii_lowercase())
			.collect();

		Self(format!("{DEVICE_UID_PREFIX}{suffix}"))
	}
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}
