//! Restart guard for the managed component and the host core.
//!
//! Hosts wire a [`RestartScheduler`] where they would otherwise restart the core directly after
//! an integration change, so bursts of requests collapse into one restart.

// self
use crate::{
	_prelude::*,
	auth::ComponentId,
	error::ManagementApiError,
	http::{HttpTransport, TransportErrorMapper},
	supervisor::ManagementClient,
};

/// Boxed future returned by [`RestartScheduler`] implementations.
pub type RestartFuture<'a> =
	Pin<Box<dyn Future<Output = Result<RestartDecision, ManagementApiError>> + 'a + Send>>;

/// What to restart.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RestartTarget {
	/// A managed component.
	Component(ComponentId),
	/// The host application core.
	Host,
}
impl Display for RestartTarget {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			RestartTarget::Component(id) => write!(f, "component `{id}`"),
			RestartTarget::Host => f.write_str("host"),
		}
	}
}

/// Whether a restart request reached the management API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartDecision {
	/// The restart was sent.
	Issued,
	/// An earlier request for the same target already covers this one.
	Coalesced,
}

/// Host-owned restart capability.
pub trait RestartScheduler
where
	Self: Send + Sync,
{
	/// Requests a restart of `target`.
	fn request_restart(&self, target: RestartTarget) -> RestartFuture<'_>;
}

/// Forwards restarts to the management API at most once per target until [`reset`].
///
/// [`reset`]: CoalescingRestarter::reset
pub struct CoalescingRestarter<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	management: ManagementClient<C, M>,
	issued: Mutex<HashSet<RestartTarget>>,
}
impl<C, M> CoalescingRestarter<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a restarter backed by `management`.
	pub fn new(management: ManagementClient<C, M>) -> Self {
		Self { management, issued: Default::default() }
	}

	/// Forgets issued restarts so the next request for any target is sent again.
	pub fn reset(&self) {
		self.issued.lock().clear();
	}

	/// Returns `true` when a restart for `target` was issued since the last reset.
	pub fn was_issued(&self, target: &RestartTarget) -> bool {
		self.issued.lock().contains(target)
	}

	async fn issue(&self, target: RestartTarget) -> Result<RestartDecision, ManagementApiError> {
		if !self.issued.lock().insert(target.clone()) {
			return Ok(RestartDecision::Coalesced);
		}

		let result = match &target {
			RestartTarget::Component(id) => self.management.restart(id).await,
			RestartTarget::Host => self.management.restart_host().await,
		};

		if let Err(e) = result {
			self.issued.lock().remove(&target);

			return Err(e);
		}

		Ok(RestartDecision::Issued)
	}
}
impl<C, M> RestartScheduler for CoalescingRestarter<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn request_restart(&self, target: RestartTarget) -> RestartFuture<'_> {
		Box::pin(self.issue(target))
	}
}
impl<C, M> Debug for CoalescingRestarter<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CoalescingRestarter")
			.field("management", &self.management)
			.field("issued", &self.issued.lock().len())
			.finish()
	}
}
