#![cfg(feature = "reqwest")]

// crates.io
use httpmock::{Mock, prelude::*};
// self
use hub_provisioner::{
	auth::{DeviceUid, HubId, TokenSecret},
	config::ProvisioningDescriptor,
	enrollment::{
		EnrollmentOutcome, EnrollmentRecord, EnrollmentRequest, EnrollmentState, EnrollmentStep,
		FailureReason, ProvisioningStatus, Provisioner, ReqwestProvisioner,
	},
	oidc::PendingReason,
	portal::TunnelServer,
	url::Url,
};

const DEVICE_PATH: &str = "/realms/energy/protocol/openid-connect/auth/device";
const TOKEN_PATH: &str = "/realms/energy/protocol/openid-connect/token";
const USERINFO_PATH: &str = "/realms/energy/protocol/openid-connect/userinfo";
const ENROLL_PATH: &str = "/api/ha/enroll";
const ROTATE_SECRET_PATH: &str = "/api/ha/frp/rotate";

fn provisioner(server: &MockServer) -> ReqwestProvisioner {
	let descriptor = ProvisioningDescriptor::builder("hub-app")
		.issuer(Url::parse(&server.url("/realms/energy")).expect("Mock issuer should parse."))
		.portal(Url::parse(&server.url("/")).expect("Mock portal should parse."))
		.build()
		.expect("Descriptor should build for the mock server.");

	Provisioner::new(&descriptor).expect("Provisioner should build.")
}

fn request() -> EnrollmentRequest {
	EnrollmentRequest::new(DeviceUid::new("hub-abc").expect("Device uid should be valid."))
		.with_label("Maison")
}

fn enroll_body(secret: Option<&str>) -> String {
	let secret = secret.map(|s| format!(r#","device_secret":"{s}""#)).unwrap_or_default();

	format!(
		r#"{{"ha_uuid":"hub-1","tunnel_domain":"maison.ha.example.com","device_token":"dt-1","frpc":{{"server_addr":"relay.example.com","server_port":7000,"tls_enable":true{secret}}}}}"#
	)
}

async fn mount_device_code(server: &MockServer) -> Mock<'_> {
	server
		.mock_async(|when, then| {
			when.method(POST).path(DEVICE_PATH);
			then.status(200).header("content-type", "application/json").body(
				r#"{"device_code":"dc-1","user_code":"WDJB-MJHT","verification_uri":"https://id.example.com/device","verification_uri_complete":"https://id.example.com/device?code=WDJB-MJHT","interval":2}"#,
			);
		})
		.await
}

async fn mount_granted_token(server: &MockServer) -> Mock<'_> {
	server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH).body_includes("device_code=dc-1");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"at-1","token_type":"Bearer","expires_in":300}"#);
		})
		.await
}

async fn mount_userinfo(server: &MockServer, status: u16) -> Mock<'_> {
	server
		.mock_async(|when, then| {
			when.method(GET).path(USERINFO_PATH).header("authorization", "Bearer at-1");
			then.status(status)
				.header("content-type", "application/json")
				.body(r#"{"sub":"f:1","email":"owner@example.com","name":"Owner"}"#);
		})
		.await
}

async fn mount_enroll(server: &MockServer, status: u16, body: String) -> Mock<'_> {
	server
		.mock_async(|when, then| {
			when.method(POST).path(ENROLL_PATH).header("authorization", "Bearer at-1");
			then.status(status).header("content-type", "application/json").body(body);
		})
		.await
}

async fn mount_rotate_secret<'a>(
	server: &'a MockServer,
	status: u16,
	body: &'a str,
) -> Mock<'a> {
	server
		.mock_async(|when, then| {
			when.method(POST)
				.path(ROTATE_SECRET_PATH)
				.header("authorization", "Bearer at-1")
				.body_includes(r#""ha_uuid":"hub-1""#);
			then.status(status).header("content-type", "application/json").body(body);
		})
		.await
}

async fn run_to_completion(server: &MockServer) -> Box<EnrollmentOutcome> {
	let provisioner = provisioner(server);
	let session = provisioner.start(request());

	assert!(matches!(provisioner.advance(&session).await, EnrollmentStep::AwaitingUser(_)));

	match provisioner.advance(&session).await {
		EnrollmentStep::Complete(outcome) => outcome,
		other => panic!("Unexpected step: {other:?}"),
	}
}

#[tokio::test]
async fn first_trigger_prompts_and_later_triggers_poll() {
	let server = MockServer::start_async().await;
	let device = mount_device_code(&server).await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"error":"slow_down"}"#);
		})
		.await;
	let provisioner = provisioner(&server);
	let session = provisioner.start(request());

	assert_eq!(session.state().await, EnrollmentState::Init);

	let prompt = match provisioner.advance(&session).await {
		EnrollmentStep::AwaitingUser(prompt) => prompt,
		other => panic!("Unexpected step: {other:?}"),
	};

	assert_eq!(prompt.user_code, "WDJB-MJHT");
	assert_eq!(prompt.verification_uri, "https://id.example.com/device?code=WDJB-MJHT");
	assert_eq!(prompt.interval.whole_seconds(), 2);
	assert_eq!(prompt.last_pending, None);

	let prompt = match provisioner.advance(&session).await {
		EnrollmentStep::AwaitingUser(prompt) => prompt,
		other => panic!("Unexpected step: {other:?}"),
	};

	assert_eq!(prompt.last_pending, Some(PendingReason::SlowDown));
	assert!(!prompt.requires_restart());
	assert!(matches!(
		session.state().await,
		EnrollmentState::AwaitingUserAuthorization {
			last_pending: Some(PendingReason::SlowDown),
			..
		}
	));

	device.assert_calls_async(1).await;
	token.assert_calls_async(1).await;
}

#[tokio::test]
async fn expired_codes_ask_for_a_new_session() {
	let server = MockServer::start_async().await;

	mount_device_code(&server).await;
	server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"error":"expired_token"}"#);
		})
		.await;

	let provisioner = provisioner(&server);
	let session = provisioner.start(request());

	provisioner.advance(&session).await;

	match provisioner.advance(&session).await {
		EnrollmentStep::AwaitingUser(prompt) => assert!(prompt.requires_restart()),
		other => panic!("Unexpected step: {other:?}"),
	}
}

#[tokio::test]
async fn delivered_secret_completes_without_rotation() {
	let server = MockServer::start_async().await;
	let _device = mount_device_code(&server).await;
	let token = mount_granted_token(&server).await;
	let _userinfo = mount_userinfo(&server, 200).await;
	let enroll = mount_enroll(&server, 200, enroll_body(Some("s3cret"))).await;
	let rotate = mount_rotate_secret(&server, 200, r#"{"device_secret":"unused"}"#).await;
	let provisioner = provisioner(&server);
	let session = provisioner.start(request());

	provisioner.advance(&session).await;

	let outcome = match provisioner.advance(&session).await {
		EnrollmentStep::Complete(outcome) => outcome,
		other => panic!("Unexpected step: {other:?}"),
	};

	assert_eq!(outcome.status, ProvisioningStatus::Ok);
	assert!(!outcome.secret_recovered);
	assert_eq!(outcome.identity.label(), Some("Owner"));
	assert_eq!(outcome.record.hub_id.as_ref(), "hub-1");
	assert_eq!(outcome.record.tunnel_secret.as_ref().map(|s| s.expose()), Some("s3cret"));

	// Terminal states are sticky and send nothing.
	assert!(matches!(provisioner.advance(&session).await, EnrollmentStep::Complete(_)));
	assert!(session.state().await.is_terminal());

	token.assert_calls_async(1).await;
	enroll.assert_calls_async(1).await;
	rotate.assert_calls_async(0).await;
}

#[tokio::test]
async fn withheld_secret_is_recovered_by_one_rotation() {
	let server = MockServer::start_async().await;

	mount_device_code(&server).await;
	mount_granted_token(&server).await;
	mount_userinfo(&server, 200).await;
	mount_enroll(&server, 200, enroll_body(None)).await;

	let rotate = mount_rotate_secret(&server, 200, r#"{"ok":true,"device_secret":"s2"}"#).await;
	let outcome = run_to_completion(&server).await;

	rotate.assert_calls_async(1).await;

	assert_eq!(outcome.status, ProvisioningStatus::Ok);
	assert!(outcome.secret_recovered);
	assert_eq!(outcome.record.tunnel_secret.as_ref().map(|s| s.expose()), Some("s2"));
}

#[tokio::test]
async fn reauthentication_sends_the_known_hub_and_recovers_the_secret() {
	let server = MockServer::start_async().await;

	mount_device_code(&server).await;
	mount_granted_token(&server).await;
	mount_userinfo(&server, 200).await;

	let enroll = server
		.mock_async(|when, then| {
			when.method(POST)
				.path(ENROLL_PATH)
				.header("authorization", "Bearer at-1")
				.body_includes(r#""ha_uuid":"hub-1""#);
			then.status(200).header("content-type", "application/json").body(enroll_body(None));
		})
		.await;
	let rotate = mount_rotate_secret(&server, 200, r#"{"ok":true,"device_secret":"new"}"#).await;
	let previous = EnrollmentRecord {
		hub_id: HubId::new("hub-1").expect("Hub id should be valid."),
		slug: None,
		tunnel_domain: "maison.ha.example.com".into(),
		device_token: TokenSecret::new("dt-0"),
		tunnel: TunnelServer { addr: "relay.example.com".into(), port: 7000, tls_enabled: true },
		tunnel_secret: Some(TokenSecret::new("old")),
	};
	let request = EnrollmentRequest::reauthenticate(
		DeviceUid::new("hub-abc").expect("Device uid should be valid."),
		&previous,
	);

	assert!(request.is_reauthentication());

	let provisioner = provisioner(&server);
	let session = provisioner.start(request);

	assert!(matches!(provisioner.advance(&session).await, EnrollmentStep::AwaitingUser(_)));

	let outcome = match provisioner.advance(&session).await {
		EnrollmentStep::Complete(outcome) => outcome,
		other => panic!("Unexpected step: {other:?}"),
	};

	enroll.assert_calls_async(1).await;
	rotate.assert_calls_async(1).await;

	assert_eq!(outcome.status, ProvisioningStatus::Ok);
	assert!(outcome.secret_recovered);
	assert_eq!(outcome.record.tunnel_secret.as_ref().map(|s| s.expose()), Some("new"));
}

#[tokio::test]
async fn failed_recovery_degrades_and_identity_stays_best_effort() {
	let server = MockServer::start_async().await;

	mount_device_code(&server).await;
	mount_granted_token(&server).await;
	mount_userinfo(&server, 500).await;
	mount_enroll(&server, 200, enroll_body(Some(""))).await;

	let rotate = mount_rotate_secret(&server, 500, r#"{"error":"boom"}"#).await;
	let outcome = run_to_completion(&server).await;

	rotate.assert_calls_async(1).await;

	assert_eq!(outcome.status, ProvisioningStatus::DegradedNoSecret);
	assert!(!outcome.secret_recovered);
	assert!(!outcome.record.has_tunnel_secret());
	assert!(outcome.identity.is_empty());
}

#[tokio::test]
async fn portal_failures_are_terminal() {
	for (status, reason, tag) in [
		(500, FailureReason::PortalEnrollFailed, Some(ProvisioningStatus::ExchangeFailed)),
		(403, FailureReason::PortalEnrollRejected, None),
	] {
		let server = MockServer::start_async().await;

		mount_device_code(&server).await;
		mount_granted_token(&server).await;
		mount_userinfo(&server, 200).await;
		mount_enroll(&server, status, r#"{"error":"nope"}"#.into()).await;

		let provisioner = provisioner(&server);
		let session = provisioner.start(request());

		provisioner.advance(&session).await;

		let failure = match provisioner.advance(&session).await {
			EnrollmentStep::Failed(failure) => failure,
			other => panic!("Unexpected step: {other:?}"),
		};

		assert_eq!(failure.reason, reason);
		assert_eq!(failure.status(), tag);
		assert_eq!(failure.identity.label(), Some("Owner"));
		assert!(matches!(session.state().await, EnrollmentState::Failed(_)));
	}
}

#[tokio::test]
async fn device_code_refusal_fails_the_first_trigger() {
	let server = MockServer::start_async().await;
	let device = server
		.mock_async(|when, then| {
			when.method(POST).path(DEVICE_PATH);
			then.status(401)
				.header("content-type", "application/json")
				.body(r#"{"error":"unauthorized_client"}"#);
		})
		.await;
	let provisioner = provisioner(&server);
	let session = provisioner.start(request());

	for _ in 0..2 {
		match provisioner.advance(&session).await {
			EnrollmentStep::Failed(failure) => {
				assert_eq!(failure.reason, FailureReason::DeviceAuthFailed);
				assert!(failure.message.contains("unauthorized_client"));
				assert_eq!(failure.status(), None);
			},
			other => panic!("Unexpected step: {other:?}"),
		}
	}

	device.assert_calls_async(1).await;
}

#[tokio::test]
async fn concurrent_triggers_are_serialized() {
	let server = MockServer::start_async().await;
	let device = mount_device_code(&server).await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"error":"authorization_pending"}"#);
		})
		.await;
	let provisioner = provisioner(&server);
	let session = provisioner.start(request());
	let shared = session.clone();
	let (first, second) = tokio::join!(provisioner.advance(&session), provisioner.advance(&shared));

	assert!(matches!(first, EnrollmentStep::AwaitingUser(_)));
	assert!(matches!(second, EnrollmentStep::AwaitingUser(_)));

	device.assert_calls_async(1).await;
	token.assert_calls_async(1).await;
}
