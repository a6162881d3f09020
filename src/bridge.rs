//! Periodic tunnel refresh: portal tunnel parameters pushed into the tunnel client add-on.
//!
//! The portal never re-sends the tunnel secret, so the refresh always uses the secret already
//! stored in the record. Without one the add-on is left untouched.

// self
use crate::{
	_prelude::*,
	config::LocalEndpoint,
	enrollment::EnrollmentRecord,
	http::{HttpTransport, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome},
	portal::PortalClient,
	reconcile::{AddonDesiredOptions, ComponentSelector, ReconcileOutcome, Reconciler},
};

/// Result of [`refresh_tunnel`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeOutcome {
	/// The add-on was reconciled against the refreshed parameters.
	Reconciled(ReconcileOutcome),
	/// The record holds no tunnel secret; the add-on was not touched.
	SkippedNoSecret {
		/// Tunnel domain reported by the portal.
		tunnel_domain: String,
	},
}
impl BridgeOutcome {
	/// Returns `true` when reconciliation ran.
	pub fn is_reconciled(&self) -> bool {
		matches!(self, BridgeOutcome::Reconciled(_))
	}
}

/// Fetches the tunnel parameters with the record's device token, merges them into `record`,
/// and reconciles the add-on selected by `selector`.
///
/// `record` is updated even when reconciliation fails or is skipped; persist it afterwards.
/// A rejected device token surfaces as [`Error::PortalAuth`] so the host can start a
/// re-authentication.
pub async fn refresh_tunnel<C, M>(
	portal: &PortalClient<C, M>,
	reconciler: &Reconciler<C, M>,
	selector: &ComponentSelector,
	record: &mut EnrollmentRecord,
	local: &LocalEndpoint,
) -> Result<BridgeOutcome>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let config = portal.tunnel_config(&record.device_token).await?;

	record.apply_tunnel_config(config);

	let Some(desired) = AddonDesiredOptions::from_record(record, local) else {
		obs::record_flow_outcome(FlowKind::Reconcile, FlowOutcome::Degraded);
		obs::flow_warning(
			FlowKind::Reconcile,
			&format_args!("hub `{}` has no tunnel secret; add-on left unchanged", record.hub_id),
		);

		return Ok(BridgeOutcome::SkippedNoSecret { tunnel_domain: record.tunnel_domain.clone() });
	};
	let outcome = reconciler.reconcile(selector, &desired).await?;

	Ok(BridgeOutcome::Reconciled(outcome))
}
