// std
use std::{
	error::Error as StdError,
	fmt::{Display, Formatter, Result as FmtResult},
	future::{self, Future},
	pin::Pin,
	sync::Arc,
};
// crates.io
use parking_lot::Mutex;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
// self
use hub_provisioner::{
	auth::{ComponentId, HubId, TokenSecret},
	bridge::{self, BridgeOutcome},
	config::{LocalEndpoint, ManagementConfig},
	enrollment::EnrollmentRecord,
	error::{Error, ReconcileError},
	http::{
		GenericTransportErrorMapper, HttpTransport, ResponseMetadata, ResponseMetadataSlot,
		oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse, http::Response},
	},
	portal::{PortalClient, TunnelServer},
	reconcile::{
		AddonDesiredOptions, CoalescingRestarter, ComponentSelector, ReconcileAction, Reconciler,
		RestartDecision, RestartScheduler, RestartTarget,
	},
	supervisor::ManagementClient,
	url::Url,
};

const SLUG: &str = "local_openenergy_frpc";

#[derive(Debug)]
enum FakeTransportError {}
impl Display for FakeTransportError {
	fn fmt(&self, _: &mut Formatter) -> FmtResult {
		match *self {}
	}
}
impl StdError for FakeTransportError {}

/// Mutable platform state shared by every handle.
struct HubState {
	addons: Vec<(String, String)>,
	options: JsonMap<String, JsonValue>,
	started: bool,
	tunnel_config: JsonValue,
	calls: Vec<String>,
}
impl HubState {
	fn mutations(&self) -> Vec<&str> {
		self.calls.iter().filter(|call| call.starts_with("POST")).map(String::as_str).collect()
	}

	fn respond(&mut self, request: &HttpRequest) -> (u16, JsonValue) {
		let method = request.method().as_str().to_owned();
		let path = request.uri().path().to_owned();

		self.calls.push(format!("{method} {path}"));

		let info_path = format!("/addons/{SLUG}/info");
		let options_path = format!("/addons/{SLUG}/options");
		let restart_path = format!("/addons/{SLUG}/restart");
		let start_path = format!("/addons/{SLUG}/start");

		match (method.as_str(), path.as_str()) {
			("GET", "/addons") => {
				let addons = self
					.addons
					.iter()
					.map(|(slug, name)| json!({ "slug": slug, "name": name }))
					.collect::<Vec<_>>();

				(200, json!({ "result": "ok", "data": { "addons": addons } }))
			},
			("GET", p) if p == info_path => {
				let state = if self.started { "started" } else { "stopped" };

				(200, json!({
					"result": "ok",
					"data": { "slug": SLUG, "state": state, "options": self.options }
				}))
			},
			("POST", p) if p == options_path => {
				let body: JsonValue =
					serde_json::from_slice(request.body()).expect("Options body should be JSON.");

				self.options = body["options"].as_object().cloned().unwrap_or_default();

				(200, json!({ "result": "ok", "data": {} }))
			},
			("POST", p) if p == restart_path || p == start_path => {
				self.started = true;

				(200, json!({ "result": "ok", "data": {} }))
			},
			("POST", "/core/restart") => (200, JsonValue::Null),
			("GET", "/api/ha/frpc") => (200, self.tunnel_config.clone()),
			_ => (404, json!({ "result": "error", "message": "not found" })),
		}
	}
}

/// In-process stand-in for the management API and the portal's tunnel endpoint.
#[derive(Clone)]
struct FakeHub {
	state: Arc<Mutex<HubState>>,
}
impl FakeHub {
	fn new(options: JsonValue, started: bool) -> Self {
		Self {
			state: Arc::new(Mutex::new(HubState {
				addons: vec![
					("core_ssh".into(), "Terminal & SSH".into()),
					(SLUG.into(), "OpenEnergy FRP Client".into()),
				],
				options: options.as_object().cloned().unwrap_or_default(),
				started,
				tunnel_config: json!({
					"ok": true,
					"ha_uuid": "hub-42",
					"tunnel_domain": "maison.tunnel.example.com",
					"frpc": { "server_addr": "relay2.example.com", "server_port": 7443 }
				}),
				calls: Vec::new(),
			})),
		}
	}

	fn mutations(&self) -> Vec<String> {
		self.state.lock().mutations().into_iter().map(str::to_owned).collect()
	}

	fn calls(&self) -> usize {
		self.state.lock().calls.len()
	}

	fn options(&self) -> JsonMap<String, JsonValue> {
		self.state.lock().options.clone()
	}
}
impl HttpTransport for FakeHub {
	type Handle = FakeHubHandle;
	type TransportError = FakeTransportError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		FakeHubHandle { state: self.state.clone(), slot }
	}
}

struct FakeHubHandle {
	state: Arc<Mutex<HubState>>,
	slot: ResponseMetadataSlot,
}
impl<'a> AsyncHttpClient<'a> for FakeHubHandle {
	type Error = HttpClientError<FakeTransportError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'a + Send + Sync>>;

	fn call(&'a self, request: HttpRequest) -> Self::Future {
		let (status, body) = self.state.lock().respond(&request);

		self.slot.store(ResponseMetadata { status: Some(status), elapsed: None });

		let body = if body.is_null() { Vec::new() } else { body.to_string().into_bytes() };
		let response =
			Response::builder().status(status).body(body).expect("Fake response should build.");

		Box::pin(future::ready(Ok(response)))
	}
}

type FakeReconciler = Reconciler<FakeHub, GenericTransportErrorMapper>;

fn management(hub: &FakeHub) -> ManagementClient<FakeHub, GenericTransportErrorMapper> {
	let base = Url::parse("http://supervisor/").expect("Management URL should parse.");

	ManagementClient::with_http_client(
		ManagementConfig::new(base, TokenSecret::new("sv-token")),
		hub.clone(),
		GenericTransportErrorMapper,
	)
}

fn reconciler(hub: &FakeHub) -> FakeReconciler {
	Reconciler::new(management(hub))
}

fn desired() -> AddonDesiredOptions {
	AddonDesiredOptions {
		server_addr: "relay.example.com".into(),
		server_port: 7000,
		tls_enable: true,
		hub_id: HubId::new("hub-42").expect("Hub id should be valid."),
		tunnel_secret: TokenSecret::new("s3cret"),
		tunnel_domain: "maison.tunnel.example.com".into(),
		local_ip: "127.0.0.1".into(),
		local_port: 8123,
	}
}

fn record(secret: Option<&str>) -> EnrollmentRecord {
	EnrollmentRecord {
		hub_id: HubId::new("hub-42").expect("Hub id should be valid."),
		slug: None,
		tunnel_domain: "old.tunnel.example.com".into(),
		device_token: TokenSecret::new("dt-1"),
		tunnel: TunnelServer { addr: "relay.example.com".into(), port: 7000, tls_enabled: false },
		tunnel_secret: secret.map(TokenSecret::new),
	}
}

#[tokio::test]
async fn repeated_reconciles_push_and_restart_once() {
	let hub = FakeHub::new(json!({ "log_level": "debug", "server_addr": "stale" }), true);
	let reconciler = reconciler(&hub);
	let selector = ComponentSelector::default();
	let first =
		reconciler.reconcile(&selector, &desired()).await.expect("First pass should succeed.");
	let second =
		reconciler.reconcile(&selector, &desired()).await.expect("Second pass should succeed.");

	assert_eq!(first.action, ReconcileAction::Restarted);
	assert_eq!(first.component.as_ref(), SLUG);
	assert_eq!(first.tunnel_domain, "maison.tunnel.example.com");
	assert_eq!(second.action, ReconcileAction::Unchanged);
	assert_eq!(hub.mutations(), vec![
		format!("POST /addons/{SLUG}/options"),
		format!("POST /addons/{SLUG}/restart"),
	]);

	let options = hub.options();

	assert_eq!(options["log_level"], "debug");
	assert_eq!(options["server_addr"], "relay.example.com");
	assert_eq!(options["device_secret"], "s3cret");
}

#[tokio::test]
async fn stopped_component_is_started() {
	let hub = FakeHub::new(json!({}), false);
	let outcome = reconciler(&hub)
		.reconcile(&ComponentSelector::default(), &desired())
		.await
		.expect("Reconcile should succeed.");

	assert_eq!(outcome.action, ReconcileAction::Started);
	assert_eq!(
		hub.mutations().last().map(String::as_str),
		Some("POST /addons/local_openenergy_frpc/start")
	);
}

#[tokio::test]
async fn equal_options_in_other_shapes_are_left_alone() {
	let hub = FakeHub::new(
		json!({
			"local_port": 8123.0,
			"local_ip": "127.0.0.1",
			"tunnel_domain": "maison.tunnel.example.com",
			"device_secret": "s3cret",
			"ha_uuid": "hub-42",
			"tls_enable": true,
			"server_port": 7000,
			"server_addr": "relay.example.com"
		}),
		true,
	);
	let outcome = reconciler(&hub)
		.reconcile(&ComponentSelector::default(), &desired())
		.await
		.expect("Reconcile should succeed.");

	assert_eq!(outcome.action, ReconcileAction::Unchanged);
	assert!(hub.mutations().is_empty());
}

#[tokio::test]
async fn unmatched_selector_reports_component_not_found() {
	let hub = FakeHub::new(json!({}), true);
	let selector = ComponentSelector::exact(
		ComponentId::new("missing_addon").expect("Component id should be valid."),
	);
	let err = reconciler(&hub)
		.reconcile(&selector, &desired())
		.await
		.expect_err("Missing component should fail.");

	match err {
		Error::Reconcile(ReconcileError::ComponentNotFound { selector, source }) => {
			assert_eq!(selector, "id `missing_addon`");
			assert!(source.is_none());
		},
		other => panic!("Unexpected error: {other:?}"),
	}

	assert!(hub.mutations().is_empty());
}

#[tokio::test]
async fn coalescing_restarter_sends_each_target_once() {
	let hub = FakeHub::new(json!({}), true);
	let restarter = CoalescingRestarter::new(management(&hub));
	let component =
		RestartTarget::Component(ComponentId::new(SLUG).expect("Component id should be valid."));

	assert_eq!(
		restarter.request_restart(component.clone()).await.expect("Restart should succeed."),
		RestartDecision::Issued
	);
	assert_eq!(
		restarter.request_restart(component.clone()).await.expect("Restart should coalesce."),
		RestartDecision::Coalesced
	);
	assert_eq!(
		restarter.request_restart(RestartTarget::Host).await.expect("Host restart should succeed."),
		RestartDecision::Issued
	);
	assert!(restarter.was_issued(&component));

	restarter.reset();

	assert!(!restarter.was_issued(&component));
	assert_eq!(
		restarter.request_restart(component).await.expect("Restart should be sent again."),
		RestartDecision::Issued
	);
	assert_eq!(hub.mutations(), vec![
		format!("POST /addons/{SLUG}/restart"),
		"POST /core/restart".to_owned(),
		format!("POST /addons/{SLUG}/restart"),
	]);
}

#[tokio::test]
async fn bridge_refresh_merges_portal_parameters() {
	let hub = FakeHub::new(json!({}), true);
	let portal = PortalClient::with_http_client(
		Url::parse("https://portal.example.com/").expect("Portal URL should parse."),
		hub.clone(),
		GenericTransportErrorMapper,
	);
	let mut record = record(Some("s3cret"));
	let outcome = bridge::refresh_tunnel(
		&portal,
		&reconciler(&hub),
		&ComponentSelector::default(),
		&mut record,
		&LocalEndpoint::default(),
	)
	.await
	.expect("Refresh should succeed.");

	assert!(outcome.is_reconciled());
	assert_eq!(record.tunnel_domain, "maison.tunnel.example.com");
	assert_eq!(record.tunnel.addr, "relay2.example.com");
	assert_eq!(record.tunnel_secret.as_ref().map(TokenSecret::expose), Some("s3cret"));

	let options = hub.options();

	assert_eq!(options["server_port"], 7443);
	assert_eq!(options["tls_enable"], false);
	assert_eq!(options["local_port"], 8123);
}

#[tokio::test]
async fn bridge_refresh_without_secret_leaves_the_addon_alone() {
	let hub = FakeHub::new(json!({ "device_secret": "old" }), true);
	let portal = PortalClient::with_http_client(
		Url::parse("https://portal.example.com/").expect("Portal URL should parse."),
		hub.clone(),
		GenericTransportErrorMapper,
	);
	let mut record = record(None);
	let outcome = bridge::refresh_tunnel(
		&portal,
		&reconciler(&hub),
		&ComponentSelector::default(),
		&mut record,
		&LocalEndpoint::default(),
	)
	.await
	.expect("Refresh should succeed.");

	assert_eq!(outcome, BridgeOutcome::SkippedNoSecret {
		tunnel_domain: "maison.tunnel.example.com".into()
	});
	assert_eq!(hub.calls(), 1);
	assert_eq!(hub.options()["device_secret"], "old");
}
