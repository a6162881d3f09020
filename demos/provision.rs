//! Walks a hub through enrollment and tunnel reconciliation against mocked services.
//!
//! 1. The first trigger requests a device code and prints the prompt.
//! 2. The second trigger finds the login approved, enrolls with the portal, and recovers the
//!    withheld tunnel secret through one rotation.
//! 3. Tunnel refreshes push the parameters into the add-on. The mocked management API keeps
//!    reporting empty options, so every pass writes and restarts.

// crates.io
use color_eyre::{Result, eyre::eyre};
use httpmock::prelude::*;
// self
use hub_provisioner::{
	auth::{DeviceUid, TokenSecret},
	bridge::{self, BridgeOutcome},
	config::{LocalEndpoint, ManagementConfig, ProvisioningDescriptor},
	enrollment::{EnrollmentRequest, EnrollmentStep, Provisioner},
	portal::PortalClient,
	reconcile::{ComponentSelector, Reconciler},
	supervisor::ManagementClient,
	url::Url,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;

	mount_identity_provider(&server).await;
	mount_portal(&server).await;

	let options_mock = mount_supervisor(&server).await;
	let descriptor = ProvisioningDescriptor::builder("hub-app")
		.issuer(Url::parse(&server.url("/realms/energy"))?)
		.portal(Url::parse(&server.url("/"))?)
		.build()?;
	let provisioner = Provisioner::new(&descriptor)?;
	let session = provisioner
		.start(EnrollmentRequest::new(DeviceUid::generate()).with_label("Demo hub"));

	if let EnrollmentStep::AwaitingUser(prompt) = provisioner.advance(&session).await {
		println!("Open {} and enter {}.", prompt.verification_uri, prompt.user_code);
	}

	let outcome = match provisioner.advance(&session).await {
		EnrollmentStep::Complete(outcome) => outcome,
		EnrollmentStep::Failed(failure) => return Err(eyre!("enrollment failed: {failure}")),
		EnrollmentStep::AwaitingUser(_) => return Err(eyre!("login was not approved")),
	};

	println!(
		"Enrolled hub {} at {} (status: {}, secret recovered: {}).",
		outcome.record.hub_id,
		outcome.record.tunnel_domain,
		outcome.status,
		outcome.secret_recovered,
	);

	let mut record = outcome.record.clone();
	let management = ManagementClient::new(ManagementConfig::new(
		Url::parse(&server.url("/supervisor/"))?,
		TokenSecret::new("demo-supervisor-token"),
	))?;
	let reconciler = Reconciler::new(management);
	let portal = PortalClient::new(descriptor.portal.clone())?;
	let selector = ComponentSelector::default();
	let local = LocalEndpoint::default();

	for pass in 1..=2 {
		match bridge::refresh_tunnel(&portal, &reconciler, &selector, &mut record, &local).await? {
			BridgeOutcome::Reconciled(outcome) =>
				println!(
					"Refresh {pass}: component {} {}.",
					outcome.component,
					outcome.action.as_str()
				),
			BridgeOutcome::SkippedNoSecret { tunnel_domain } =>
				println!("Refresh {pass}: no tunnel secret for {tunnel_domain}."),
		}
	}

	println!("Add-on options were pushed {} time(s).", options_mock.calls_async().await);

	Ok(())
}

async fn mount_identity_provider(server: &MockServer) {
	server
		.mock_async(|when, then| {
			when.method(POST).path("/realms/energy/protocol/openid-connect/auth/device");
			then.status(200).header("content-type", "application/json").body(
				"{\"device_code\":\"demo-device\",\"user_code\":\"WDJB-MJHT\",\
				 \"verification_uri\":\"https://id.example.com/device\",\"interval\":1}",
			);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/realms/energy/protocol/openid-connect/token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"demo-access\",\"expires_in\":300}");
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/realms/energy/protocol/openid-connect/userinfo");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"sub\":\"demo\",\"name\":\"Demo Owner\"}");
		})
		.await;
}

async fn mount_portal(server: &MockServer) {
	server
		.mock_async(|when, then| {
			when.method(POST).path("/api/ha/enroll");
			then.status(200).header("content-type", "application/json").body(
				"{\"ha_uuid\":\"demo-hub\",\"tunnel_domain\":\"demo.tunnel.example.com\",\
				 \"device_token\":\"demo-device-token\",\
				 \"frpc\":{\"server_addr\":\"relay.example.com\",\"server_port\":7000}}",
			);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/api/ha/frp/rotate");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"ok\":true,\"device_secret\":\"demo-secret\"}");
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/ha/frpc");
			then.status(200).header("content-type", "application/json").body(
				"{\"ok\":true,\"ha_uuid\":\"demo-hub\",\"tunnel_domain\":\"demo.tunnel.example.com\",\
				 \"frpc\":{\"server_addr\":\"relay.example.com\",\"server_port\":7000}}",
			);
		})
		.await;
}

async fn mount_supervisor(server: &MockServer) -> httpmock::Mock<'_> {
	server
		.mock_async(|when, then| {
			when.method(GET).path("/supervisor/addons");
			then.status(200).header("content-type", "application/json").body(
				"{\"result\":\"ok\",\"data\":{\"addons\":[\
				 {\"slug\":\"local_openenergy_frpc\",\"name\":\"OpenEnergy FRP Client\"}]}}",
			);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/supervisor/addons/local_openenergy_frpc/info");
			then.status(200).header("content-type", "application/json").body(
				"{\"result\":\"ok\",\"data\":{\"slug\":\"local_openenergy_frpc\",\
				 \"state\":\"started\",\"options\":{}}}",
			);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/supervisor/addons/local_openenergy_frpc/restart");
			then.status(200);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/supervisor/addons/local_openenergy_frpc/options");
			then.status(200);
		})
		.await
}
