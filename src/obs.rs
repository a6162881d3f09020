//! Optional observability helpers for provisioning flows.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit spans named `hub_provisioner.flow` with the `flow` and `stage`
//!   fields, plus warning events for outcomes the crate swallows or degrades.
//! - Enable `metrics` to increment the `hub_provisioner_flow_total` counter for every
//!   attempt/outcome, labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Provisioning operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Device authorization request.
	DeviceAuthorization,
	/// Single token poll.
	TokenPoll,
	/// Userinfo lookup.
	Userinfo,
	/// Portal enrollment (including the orchestrated state machine).
	Enrollment,
	/// Tunnel configuration fetch.
	TunnelConfig,
	/// Device token rotation.
	TokenRotation,
	/// Tunnel secret rotation.
	SecretRotation,
	/// Portal health probe.
	Health,
	/// Add-on reconciliation.
	Reconcile,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::DeviceAuthorization => "device_authorization",
			FlowKind::TokenPoll => "token_poll",
			FlowKind::Userinfo => "userinfo",
			FlowKind::Enrollment => "enrollment",
			FlowKind::TunnelConfig => "tunnel_config",
			FlowKind::TokenRotation => "token_rotation",
			FlowKind::SecretRotation => "secret_rotation",
			FlowKind::Health => "health",
			FlowKind::Reconcile => "reconcile",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// The operation finished but the user still has to act (token poll).
	Pending,
	/// The operation finished with reduced guarantees (missing secret, skipped step).
	Degraded,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Pending => "pending",
			FlowOutcome::Degraded => "degraded",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Records the terminal outcome of `result` for `kind`.
pub(crate) fn record_result<T, E>(kind: FlowKind, result: &Result<T, E>) {
	match result {
		Ok(_) => record_flow_outcome(kind, FlowOutcome::Success),
		Err(_) => record_flow_outcome(kind, FlowOutcome::Failure),
	}
}
