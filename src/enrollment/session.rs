//! Enrollment session state, user prompts, and terminal failures.

// self
use crate::{
	_prelude::*,
	auth::{DeviceUid, HubId, Identity},
	enrollment::{EnrollmentOutcome, EnrollmentRecord, ProvisioningStatus},
	oidc::{DeviceCode, PendingReason},
	portal::EnrollRequest,
};

/// Local inputs for one enrollment attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrollmentRequest {
	/// Locally stable device identifier.
	pub device_uid: DeviceUid,
	/// Hardware address, when known.
	pub device_mac: Option<String>,
	/// Human label shown on the portal.
	pub label: Option<String>,
	/// Hub identifier from a previous enrollment; set when re-authenticating.
	pub previous_hub_id: Option<HubId>,
}
impl EnrollmentRequest {
	/// First-time enrollment for `device_uid`.
	pub fn new(device_uid: DeviceUid) -> Self {
		Self { device_uid, device_mac: None, label: None, previous_hub_id: None }
	}

	/// Re-authentication of a hub that already holds `record`.
	pub fn reauthenticate(device_uid: DeviceUid, record: &EnrollmentRecord) -> Self {
		Self { previous_hub_id: Some(record.hub_id.clone()), ..Self::new(device_uid) }
	}

	/// Sets the hardware address.
	pub fn with_device_mac(mut self, mac: impl Into<String>) -> Self {
		self.device_mac = Some(mac.into());

		self
	}

	/// Sets the portal label.
	pub fn with_label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());

		self
	}

	/// Returns `true` when the request re-attaches an existing hub.
	pub fn is_reauthentication(&self) -> bool {
		self.previous_hub_id.is_some()
	}

	pub(crate) fn to_portal_request(&self) -> EnrollRequest {
		EnrollRequest {
			device_uid: self.device_uid.clone(),
			device_mac: self.device_mac.clone(),
			label: self.label.clone(),
			hub_id: self.previous_hub_id.clone(),
		}
	}
}

/// Observable state of an enrollment session.
///
/// `DeviceCodeRequested`, `TokenObtained`, `Enrolling`, and `SecretRecovery` are only held while
/// a trigger is in flight; callers observing the session between triggers see `Init`,
/// `AwaitingUserAuthorization`, or a terminal state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnrollmentState {
	/// Nothing requested yet.
	Init,
	/// A device code request is in flight.
	DeviceCodeRequested,
	/// Waiting for the user to approve the login.
	AwaitingUserAuthorization {
		/// Device code being polled.
		device_code: DeviceCode,
		/// Result of the most recent poll.
		last_pending: Option<PendingReason>,
	},
	/// The identity provider issued an access token.
	TokenObtained,
	/// The portal enrollment call is in flight.
	Enrolling,
	/// The portal withheld the secret; a rotation is in flight.
	SecretRecovery,
	/// Terminal success.
	Complete(Box<EnrollmentOutcome>),
	/// Terminal failure.
	Failed(EnrollmentFailure),
}
impl EnrollmentState {
	/// Returns a stable label suitable for logs.
	pub fn as_str(&self) -> &'static str {
		match self {
			EnrollmentState::Init => "init",
			EnrollmentState::DeviceCodeRequested => "device_code_requested",
			EnrollmentState::AwaitingUserAuthorization { .. } => "awaiting_user_authorization",
			EnrollmentState::TokenObtained => "token_obtained",
			EnrollmentState::Enrolling => "enrolling",
			EnrollmentState::SecretRecovery => "secret_recovery",
			EnrollmentState::Complete(_) => "complete",
			EnrollmentState::Failed(_) => "failed",
		}
	}

	/// Returns `true` for `Complete` and `Failed`.
	pub fn is_terminal(&self) -> bool {
		matches!(self, EnrollmentState::Complete(_) | EnrollmentState::Failed(_))
	}
}

/// Handle to one enrollment attempt.
///
/// Clones share the same state; concurrent triggers are serialized on it.
#[derive(Clone)]
pub struct EnrollmentSession {
	pub(crate) request: EnrollmentRequest,
	pub(crate) state: Arc<AsyncMutex<EnrollmentState>>,
}
impl EnrollmentSession {
	pub(crate) fn new(request: EnrollmentRequest) -> Self {
		Self { request, state: Arc::new(AsyncMutex::new(EnrollmentState::Init)) }
	}

	/// Inputs the session was started with.
	pub fn request(&self) -> &EnrollmentRequest {
		&self.request
	}

	/// Snapshot of the current state; waits for an in-flight trigger to finish.
	pub async fn state(&self) -> EnrollmentState {
		self.state.lock().await.clone()
	}
}
impl Debug for EnrollmentSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EnrollmentSession").field("request", &self.request).finish_non_exhaustive()
	}
}

/// What the host should show after a trigger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnrollmentStep {
	/// Ask the user to approve the login and trigger again.
	AwaitingUser(UserPrompt),
	/// Enrollment finished; persist the record.
	Complete(Box<EnrollmentOutcome>),
	/// Enrollment failed; start a new session to retry.
	Failed(EnrollmentFailure),
}

/// Information to display while the user approves the login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserPrompt {
	/// Code the user types on the verification page.
	pub user_code: String,
	/// Link to open; pre-filled with the code when the provider offers it.
	pub verification_uri: String,
	/// Advisory expiry of the device code.
	pub expires_at: OffsetDateTime,
	/// Advisory delay before the next trigger.
	pub interval: Duration,
	/// Result of the most recent poll; `None` before the first poll.
	pub last_pending: Option<PendingReason>,
}
impl UserPrompt {
	pub(crate) fn new(code: &DeviceCode, last_pending: Option<PendingReason>) -> Self {
		Self {
			user_code: code.user_code.clone(),
			verification_uri: code.verification_link().to_owned(),
			expires_at: code.expires_at(),
			interval: code.interval,
			last_pending,
		}
	}

	/// Returns `true` when polling this code again is pointless and a new session is needed.
	pub fn requires_restart(&self) -> bool {
		self.last_pending.as_ref().is_some_and(PendingReason::requires_restart)
	}
}

/// Why an enrollment session failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureReason {
	/// The identity provider refused to issue a device code.
	DeviceAuthFailed,
	/// The portal rejected the identity provider token (HTTP 401/403).
	PortalEnrollRejected,
	/// The portal enrollment failed for any other reason.
	PortalEnrollFailed,
}
impl FailureReason {
	/// Returns the stable wire label.
	pub const fn as_str(self) -> &'static str {
		match self {
			FailureReason::DeviceAuthFailed => "device_auth_failed",
			FailureReason::PortalEnrollRejected => "portal_enroll_rejected",
			FailureReason::PortalEnrollFailed => "portal_enroll_failed",
		}
	}
}
impl Display for FailureReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Terminal failure of an enrollment session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrollmentFailure {
	/// Failure category.
	pub reason: FailureReason,
	/// Rendered underlying error.
	pub message: String,
	/// Owner identity captured before the failure; empty when unknown.
	pub identity: Identity,
}
impl EnrollmentFailure {
	pub(crate) fn new(reason: FailureReason, error: &Error, identity: Identity) -> Self {
		Self { reason, message: error.to_string(), identity }
	}

	/// Status tag the host may keep for the hub.
	///
	/// A failed portal exchange still leaves a signed-in owner, reported as `exchange_failed`;
	/// other failures leave nothing to show.
	pub fn status(&self) -> Option<ProvisioningStatus> {
		match self.reason {
			FailureReason::PortalEnrollFailed => Some(ProvisioningStatus::ExchangeFailed),
			FailureReason::DeviceAuthFailed | FailureReason::PortalEnrollRejected => None,
		}
	}
}
impl Display for EnrollmentFailure {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}: {}", self.reason, self.message)
	}
}
