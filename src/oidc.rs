//! Identity provider endpoints and the device authorization grant client.

pub mod device;

pub use device::*;

// self
use crate::{_prelude::*, error::ConfigError};

const DEVICE_AUTHORIZATION_PATH: &str = "protocol/openid-connect/auth/device";
const TOKEN_PATH: &str = "protocol/openid-connect/token";
const USERINFO_PATH: &str = "protocol/openid-connect/userinfo";

/// Endpoints derived from a realm issuer URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcEndpoints {
	/// Device authorization endpoint.
	pub device_authorization: Url,
	/// Token endpoint.
	pub token: Url,
	/// Userinfo endpoint.
	pub userinfo: Url,
}
impl OidcEndpoints {
	/// Derives the Keycloak-style endpoints below `issuer`; trailing slashes are ignored.
	pub fn from_issuer(issuer: &Url) -> Result<Self, ConfigError> {
		let base = issuer.as_str().trim_end_matches('/');
		let derive = |endpoint: &'static str, path: &str| {
			Url::parse(&format!("{base}/{path}"))
				.map_err(|source| ConfigError::InvalidEndpoint { endpoint, source })
		};

		Ok(Self {
			device_authorization: derive("device_authorization", DEVICE_AUTHORIZATION_PATH)?,
			token: derive("token", TOKEN_PATH)?,
			userinfo: derive("userinfo", USERINFO_PATH)?,
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn endpoints_ignore_trailing_slash() {
		for issuer in ["https://id.example.com/realms/energy", "https://id.example.com/realms/energy/"] {
			let issuer = Url::parse(issuer).expect("Issuer should parse.");
			let endpoints = OidcEndpoints::from_issuer(&issuer).expect("Endpoints should derive.");

			assert_eq!(
				endpoints.device_authorization.as_str(),
				"https://id.example.com/realms/energy/protocol/openid-connect/auth/device"
			);
			assert_eq!(
				endpoints.token.as_str(),
				"https://id.example.com/realms/energy/protocol/openid-connect/token"
			);
			assert_eq!(
				endpoints.userinfo.as_str(),
				"https://id.example.com/realms/energy/protocol/openid-connect/userinfo"
			);
		}
	}
}
