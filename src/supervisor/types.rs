//! Wire types returned by the management API.

// self
use crate::{_prelude::*, auth::ComponentId};

/// Entry of `GET /addons`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonSummary {
	/// Component identifier (slug).
	pub slug: ComponentId,
	/// Human-readable name.
	#[serde(default)]
	pub name: String,
}

/// Lifecycle state reported by the management API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AddonState {
	/// The component is running.
	Started,
	/// The component is installed but not running.
	Stopped,
	/// Any other state string (`error`, `unknown`, ...), kept verbatim.
	Other(String),
	/// The API did not report a state.
	#[default]
	Unknown,
}
impl AddonState {
	/// Returns `true` when the component is running.
	pub fn is_started(&self) -> bool {
		matches!(self, AddonState::Started)
	}

	/// Returns the wire label.
	pub fn as_str(&self) -> &str {
		match self {
			AddonState::Started => "started",
			AddonState::Stopped => "stopped",
			AddonState::Other(state) => state,
			AddonState::Unknown => "unknown",
		}
	}
}
impl From<String> for AddonState {
	fn from(value: String) -> Self {
		match value.as_str() {
			"started" => AddonState::Started,
			"stopped" => AddonState::Stopped,
			"" | "unknown" => AddonState::Unknown,
			_ => AddonState::Other(value),
		}
	}
}
impl From<AddonState> for String {
	fn from(value: AddonState) -> Self {
		value.as_str().to_owned()
	}
}
impl Display for AddonState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Payload of `GET /addons/{slug}/info`, reduced to what reconciliation reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddonInfo {
	/// Component identifier (slug).
	pub slug: ComponentId,
	/// Human-readable name.
	#[serde(default)]
	pub name: Option<String>,
	/// Current lifecycle state.
	#[serde(default)]
	pub state: AddonState,
	/// Current option map.
	#[serde(default)]
	pub options: JsonMap<String, JsonValue>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddonList {
	#[serde(default)]
	pub(crate) addons: Vec<AddonSummary>,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn addon_state_keeps_unknown_labels() {
		let state: AddonState =
			serde_json::from_str("\"error\"").expect("State string should deserialize.");

		assert_eq!(state, AddonState::Other("error".into()));
		assert!(!state.is_started());
		assert!(AddonState::from("started".to_owned()).is_started());
		assert_eq!(AddonState::from(String::new()), AddonState::Unknown);
	}

	#[test]
	fn info_defaults_missing_fields() {
		let info: AddonInfo = serde_json::from_value(serde_json::json!({
			"slug": "local_openenergy_frpc",
			"version": "1.2.0",
		}))
		.expect("Info should deserialize.");

		assert_eq!(info.slug.as_ref(), "local_openenergy_frpc");
		assert_eq!(info.state, AddonState::Unknown);
		assert!(info.options.is_empty());
	}
}
