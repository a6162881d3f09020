//! Idempotent reconciliation of the tunnel client add-on.
//!
//! The reconciler locates the component, reads its options right before comparing, overlays the
//! desired keys, and only pushes + restarts when the merged map differs from what is installed.
//! Keys the crate does not own are preserved. Concurrent writers are not locked out; the last
//! write wins.

pub mod resolver;
pub mod scheduler;

pub use resolver::*;
pub use scheduler::*;

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{ComponentId, HubId, TokenSecret},
	config::LocalEndpoint,
	enrollment::EnrollmentRecord,
	error::{ManagementApiError, ReconcileError},
	http::{HttpTransport, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	supervisor::ManagementClient,
};

const FINGERPRINT_LEN: usize = 12;

/// Options the tunnel client add-on should run with.
#[derive(Clone, PartialEq, Eq)]
pub struct AddonDesiredOptions {
	/// Relay host.
	pub server_addr: String,
	/// Relay port.
	pub server_port: u16,
	/// Whether the tunnel uses TLS.
	pub tls_enable: bool,
	/// Hub identifier (`ha_uuid`).
	pub hub_id: HubId,
	/// Tunnel secret (`device_secret`).
	pub tunnel_secret: TokenSecret,
	/// Public tunnel domain.
	pub tunnel_domain: String,
	/// Local address exposed through the tunnel.
	pub local_ip: String,
	/// Local port exposed through the tunnel.
	pub local_port: u16,
}
impl AddonDesiredOptions {
	/// Builds the options for `record`; `None` when the record holds no tunnel secret.
	pub fn from_record(record: &EnrollmentRecord, local: &LocalEndpoint) -> Option<Self> {
		let tunnel_secret = record.tunnel_secret.clone()?;

		Some(Self {
			server_addr: record.tunnel.addr.clone(),
			server_port: record.tunnel.port,
			tls_enable: record.tunnel.tls_enabled,
			hub_id: record.hub_id.clone(),
			tunnel_secret,
			tunnel_domain: record.tunnel_domain.clone(),
			local_ip: local.ip.clone(),
			local_port: local.port,
		})
	}

	/// Serializes onto the add-on's option keys.
	pub fn to_options(&self) -> JsonMap<String, JsonValue> {
		let mut options = JsonMap::new();

		options.insert("server_addr".into(), self.server_addr.clone().into());
		options.insert("server_port".into(), self.server_port.into());
		options.insert("tls_enable".into(), self.tls_enable.into());
		options.insert("ha_uuid".into(), self.hub_id.to_string().into());
		options.insert("device_secret".into(), self.tunnel_secret.expose().into());
		options.insert("tunnel_domain".into(), self.tunnel_domain.clone().into());
		options.insert("local_ip".into(), self.local_ip.clone().into());
		options.insert("local_port".into(), self.local_port.into());

		options
	}

	/// Short digest of the options, safe to log.
	pub fn fingerprint(&self) -> String {
		let canonical = JsonValue::Object(self.to_options()).to_string();
		let mut digest = URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()));

		digest.truncate(FINGERPRINT_LEN);

		digest
	}
}
impl Debug for AddonDesiredOptions {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AddonDesiredOptions")
			.field("server_addr", &self.server_addr)
			.field("server_port", &self.server_port)
			.field("tls_enable", &self.tls_enable)
			.field("hub_id", &self.hub_id)
			.field("tunnel_secret", &self.tunnel_secret)
			.field("tunnel_domain", &self.tunnel_domain)
			.field("local_ip", &self.local_ip)
			.field("local_port", &self.local_port)
			.finish()
	}
}

/// What reconciliation did to the component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReconcileAction {
	/// Options already matched; nothing was sent.
	Unchanged,
	/// Options were pushed and the running component restarted.
	Restarted,
	/// Options were pushed and the stopped component started.
	Started,
}
impl ReconcileAction {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			ReconcileAction::Unchanged => "unchanged",
			ReconcileAction::Restarted => "restarted",
			ReconcileAction::Started => "started",
		}
	}
}

/// Result of a reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOutcome {
	/// Component that was reconciled.
	pub component: ComponentId,
	/// Tunnel domain the component now serves.
	pub tunnel_domain: String,
	/// Action taken.
	pub action: ReconcileAction,
}

#[cfg(feature = "reqwest")]
/// Reconciler specialized for the crate's default reqwest transport stack.
pub type ReqwestReconciler = Reconciler<
	crate::http::ReqwestHttpClient,
	crate::http::ReqwestTransportErrorMapper,
>;

/// Drives the tunnel client add-on towards [`AddonDesiredOptions`].
pub struct Reconciler<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Management API client.
	pub management: ManagementClient<C, M>,
}
impl<C, M> Reconciler<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a reconciler on top of `management`.
	pub fn new(management: ManagementClient<C, M>) -> Self {
		Self { management }
	}

	/// Reconciles the component chosen by `selector` with `desired`.
	///
	/// Sends nothing when the installed options already match. Otherwise pushes the merged
	/// options, then restarts the component if it is running or starts it if not.
	pub async fn reconcile(
		&self,
		selector: &ComponentSelector,
		desired: &AddonDesiredOptions,
	) -> Result<ReconcileOutcome> {
		const KIND: FlowKind = FlowKind::Reconcile;

		let span = FlowSpan::new(KIND, "reconcile");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.apply(selector, desired)).await.map_err(Error::from);

		obs::record_result(KIND, &result);

		result
	}

	async fn apply(
		&self,
		selector: &ComponentSelector,
		desired: &AddonDesiredOptions,
	) -> Result<ReconcileOutcome, ReconcileError> {
		let component = self.locate(selector).await?;
		let failed = |source: ManagementApiError| ReconcileError::Apply {
			component: component.to_string(),
			source,
		};
		let info = self.management.info(&component).await.map_err(failed)?;
		let merged = overlay(&info.options, desired.to_options());
		let action = if options_equal(&info.options, &merged) {
			ReconcileAction::Unchanged
		} else {
			self.management.set_options(&component, &merged).await.map_err(failed)?;

			if info.state.is_started() {
				self.management.restart(&component).await.map_err(failed)?;

				ReconcileAction::Restarted
			} else {
				self.management.start(&component).await.map_err(failed)?;

				ReconcileAction::Started
			}
		};

		if action != ReconcileAction::Unchanged {
			obs::flow_event(
				FlowKind::Reconcile,
				&format_args!(
					"component `{component}` {} with options {}",
					action.as_str(),
					desired.fingerprint()
				),
			);
		}

		Ok(ReconcileOutcome {
			tunnel_domain: desired.tunnel_domain.clone(),
			component,
			action,
		})
	}

	async fn locate(&self, selector: &ComponentSelector) -> Result<ComponentId, ReconcileError> {
		let installed = self.management.list().await.map_err(|e| {
			ReconcileError::ComponentNotFound { selector: selector.describe(), source: Some(e) }
		})?;

		selector
			.resolve(&installed)
			.ok_or_else(|| ReconcileError::ComponentNotFound {
				selector: selector.describe(),
				source: None,
			})
	}
}
impl<C, M> Clone for Reconciler<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { management: self.management.clone() }
	}
}
impl<C, M> Debug for Reconciler<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Reconciler").field("management", &self.management).finish()
	}
}

/// Applies `desired` on top of `current`, keeping keys `desired` does not set.
fn overlay(
	current: &JsonMap<String, JsonValue>,
	desired: JsonMap<String, JsonValue>,
) -> JsonMap<String, JsonValue> {
	let mut merged = current.clone();

	merged.extend(desired);

	merged
}

fn options_equal(a: &JsonMap<String, JsonValue>, b: &JsonMap<String, JsonValue>) -> bool {
	a.len() == b.len()
		&& a.iter().all(|(key, value)| b.get(key).is_some_and(|other| json_equal(value, other)))
}

/// Structural equality where numbers compare by value (`8123 == 8123.0`).
fn json_equal(a: &JsonValue, b: &JsonValue) -> bool {
	match (a, b) {
		(JsonValue::Number(x), JsonValue::Number(y)) => match (x.as_i64(), y.as_i64()) {
			(Some(x), Some(y)) => x == y,
			_ => match (x.as_u64(), y.as_u64()) {
				(Some(x), Some(y)) => x == y,
				_ => x.as_f64() == y.as_f64(),
			},
		},
		(JsonValue::Array(x), JsonValue::Array(y)) =>
			x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_equal(x, y)),
		(JsonValue::Object(x), JsonValue::Object(y)) => options_equal(x, y),
		_ => a == b,
	}
}
