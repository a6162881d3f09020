//! Enrollment orchestration: device login, portal enrollment, and one-time secret recovery.
//!
//! A session is driven by host triggers. The first [`Provisioner::advance`] requests a device
//! code and returns the prompt to show; every later trigger polls the identity provider once.
//! When the token arrives the same trigger finishes the enrollment, rotating the tunnel secret
//! once if the portal withheld it. Terminal states are sticky.

pub mod record;
pub mod session;

pub use record::*;
pub use session::*;

// self
use crate::{
	_prelude::*,
	auth::{Identity, TokenSecret},
	config::ProvisioningDescriptor,
	error::ConfigError,
	http::{HttpTransport, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	oidc::{DeviceGrantClient, TokenResult, TokenSuccess},
	portal::PortalClient,
};
#[cfg(feature = "reqwest")]
use crate::http::{ReqwestHttpClient, ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Provisioner specialized for the crate's default reqwest transport stack.
pub type ReqwestProvisioner = Provisioner<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Coordinates the identity provider and the portal for one descriptor.
///
/// The provisioner holds no enrollment data between calls; records are returned to the host,
/// which persists them and passes them back for rotations.
pub struct Provisioner<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Device grant client.
	pub device: DeviceGrantClient<C, M>,
	/// Portal client.
	pub portal: PortalClient<C, M>,
}
impl<C, M> Provisioner<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a provisioner whose clients share the caller-provided transport + mapper pair.
	pub fn with_http_client(
		descriptor: &ProvisioningDescriptor,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Result<Self, ConfigError> {
		let http_client = http_client.into();
		let mapper = mapper.into();
		let device =
			DeviceGrantClient::with_http_client(descriptor, http_client.clone(), mapper.clone())?;
		let portal = PortalClient::with_http_client(descriptor.portal.clone(), http_client, mapper);

		Ok(Self { device, portal })
	}

	/// Opens a session in the `Init` state. No request is sent until the first trigger.
	pub fn start(&self, request: EnrollmentRequest) -> EnrollmentSession {
		EnrollmentSession::new(request)
	}

	/// Handles one host trigger.
	///
	/// Concurrent triggers on the same session are serialized, so a device code is never polled
	/// twice at once. Never fails; failures are terminal [`EnrollmentStep::Failed`] values.
	pub async fn advance(&self, session: &EnrollmentSession) -> EnrollmentStep {
		const KIND: FlowKind = FlowKind::Enrollment;

		let mut state = session.state.lock().await;
		let span = FlowSpan::new(KIND, state.as_str());

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let step = span.instrument(self.drive(&session.request, &mut state)).await;

		obs::record_flow_outcome(KIND, match &step {
			EnrollmentStep::AwaitingUser(_) => FlowOutcome::Pending,
			EnrollmentStep::Complete(outcome) if outcome.status == ProvisioningStatus::Ok =>
				FlowOutcome::Success,
			EnrollmentStep::Complete(_) => FlowOutcome::Degraded,
			EnrollmentStep::Failed(_) => FlowOutcome::Failure,
		});

		step
	}

	/// Rotates the tunnel secret with a fresh identity provider token and stores it in `record`.
	///
	/// The previous secret stops working once this succeeds; persist the record immediately.
	pub async fn recover_tunnel_secret(
		&self,
		access_token: &TokenSecret,
		record: &mut EnrollmentRecord,
	) -> Result<()> {
		let secret = self.portal.rotate_tunnel_secret(access_token, &record.hub_id).await?;

		record.apply_rotated_secret(secret);

		Ok(())
	}

	/// Mints a new opaque device token and stores it in `record`.
	pub async fn rotate_device_token(
		&self,
		access_token: &TokenSecret,
		record: &mut EnrollmentRecord,
	) -> Result<()> {
		let token = self.portal.rotate_device_token(access_token, &record.hub_id).await?;

		record.apply_rotated_device_token(token);

		Ok(())
	}

	async fn drive(
		&self,
		request: &EnrollmentRequest,
		state: &mut EnrollmentState,
	) -> EnrollmentStep {
		match state {
			EnrollmentState::Complete(outcome) => EnrollmentStep::Complete(outcome.clone()),
			EnrollmentState::Failed(failure) => EnrollmentStep::Failed(failure.clone()),
			EnrollmentState::AwaitingUserAuthorization { device_code, last_pending } =>
				match self.device.poll_token_once(device_code).await {
					TokenResult::Pending(reason) => {
						let prompt = UserPrompt::new(device_code, Some(reason.clone()));

						*last_pending = Some(reason);

						EnrollmentStep::AwaitingUser(prompt)
					},
					TokenResult::Success(token) => {
						*state = EnrollmentState::TokenObtained;

						self.enroll(request, token, state).await
					},
				},
			// A trigger dropped mid-flight leaves a transient state; start over with a new code.
			EnrollmentState::Init
			| EnrollmentState::DeviceCodeRequested
			| EnrollmentState::TokenObtained
			| EnrollmentState::Enrolling
			| EnrollmentState::SecretRecovery => self.request_code(state).await,
		}
	}

	async fn request_code(&self, state: &mut EnrollmentState) -> EnrollmentStep {
		*state = EnrollmentState::DeviceCodeRequested;

		match self.device.request_device_code().await {
			Ok(device_code) => {
				let prompt = UserPrompt::new(&device_code, None);

				*state = EnrollmentState::AwaitingUserAuthorization { device_code, last_pending: None };

				EnrollmentStep::AwaitingUser(prompt)
			},
			Err(e) => fail(state, EnrollmentFailure::new(
				FailureReason::DeviceAuthFailed,
				&e,
				Identity::default(),
			)),
		}
	}

	async fn enroll(
		&self,
		request: &EnrollmentRequest,
		token: TokenSuccess,
		state: &mut EnrollmentState,
	) -> EnrollmentStep {
		const KIND: FlowKind = FlowKind::Enrollment;

		let access_token = token.access_token;
		let identity = match self.device.fetch_identity(&access_token).await {
			Ok(identity) => identity,
			Err(e) => {
				obs::flow_warning(KIND, &e);

				Identity::default()
			},
		};

		*state = EnrollmentState::Enrolling;

		let payload = match self.portal.enroll(&access_token, &request.to_portal_request()).await {
			Ok(payload) => payload,
			Err(e) => {
				let reason = if e.requires_reauthentication() {
					FailureReason::PortalEnrollRejected
				} else {
					FailureReason::PortalEnrollFailed
				};

				return fail(state, EnrollmentFailure::new(reason, &e, identity));
			},
		};
		let mut record = EnrollmentRecord::from_payload(payload);
		let mut secret_recovered = false;

		if !record.has_tunnel_secret() {
			*state = EnrollmentState::SecretRecovery;

			match self.portal.rotate_tunnel_secret(&access_token, &record.hub_id).await {
				Ok(secret) => {
					record.apply_rotated_secret(secret);

					secret_recovered = true;
				},
				Err(e) => obs::flow_warning(KIND, &format_args!("secret recovery failed: {e}")),
			}
		}

		let outcome = Box::new(EnrollmentOutcome {
			status: record.status(),
			record,
			identity,
			secret_recovered,
			access_token,
		});

		*state = EnrollmentState::Complete(outcome.clone());

		EnrollmentStep::Complete(outcome)
	}
}
#[cfg(feature = "reqwest")]
impl Provisioner<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a provisioner backed by the default reqwest transport.
	pub fn new(descriptor: &ProvisioningDescriptor) -> Result<Self, ConfigError> {
		Self::with_http_client(
			descriptor,
			ReqwestHttpClient::without_redirects()?,
			ReqwestTransportErrorMapper,
		)
	}
}
impl<C, M> Clone for Provisioner<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { device: self.device.clone(), portal: self.portal.clone() }
	}
}
impl<C, M> Debug for Provisioner<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Provisioner")
			.field("device", &self.device)
			.field("portal", &self.portal)
			.finish()
	}
}

fn fail(state: &mut EnrollmentState, failure: EnrollmentFailure) -> EnrollmentStep {
	obs::flow_warning(FlowKind::Enrollment, &failure);

	*state = EnrollmentState::Failed(failure.clone());

	EnrollmentStep::Failed(failure)
}
