//! End-to-end runs against a fake driver speaking the length-prefixed pipe protocol.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use playback::{
	ExecutionOptions, InMemoryScriptRepository, RegistryEvent, RemoteSurface, Script, SessionConfig, SessionRegistry,
	SessionState, StopOnError, Surface, SurfaceProvider,
};
use playback_runtime::{Connection, PipeTransport};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

type Answer = fn(&str, &Value) -> Option<Value>;

/// Hands out one pipe-backed [`RemoteSurface`] per session, answered by `answer`.
///
/// `None` from `answer` means the driver never replies to that request.
struct FakeDriverProvider {
	answer: Answer,
	connections: Mutex<Vec<Arc<Connection>>>,
}

impl FakeDriverProvider {
	fn new(answer: Answer) -> Arc<Self> {
		Arc::new(Self {
			answer,
			connections: Mutex::new(Vec::new()),
		})
	}
}

#[async_trait]
impl SurfaceProvider for FakeDriverProvider {
	async fn acquire(&self, _script: &Script) -> playback::Result<Box<dyn Surface>> {
		let (to_driver, driver_in) = tokio::io::duplex(256 * 1024);
		let (from_driver, driver_out) = tokio::io::duplex(256 * 1024);
		let (transport, message_rx) = PipeTransport::new(driver_in, from_driver);
		let surface = RemoteSurface::from_parts(transport.into_transport_parts(message_rx));

		tokio::spawn(serve(to_driver, driver_out, self.answer));
		self.connections.lock().push(surface.connection());
		Ok(Box::new(surface))
	}
}

async fn serve(mut requests: DuplexStream, mut replies: DuplexStream, answer: Answer) {
	loop {
		let mut len_buf = [0u8; 4];
		if requests.read_exact(&mut len_buf).await.is_err() {
			return;
		}
		let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
		if requests.read_exact(&mut body).await.is_err() {
			return;
		}
		let request: Value = serde_json::from_slice(&body).unwrap();
		let action = request["action"].as_str().unwrap_or_default();
		let Some(result) = answer(action, &request["args"]) else {
			continue;
		};

		let reply = serde_json::to_vec(&json!({ "id": request["id"], "result": result })).unwrap();
		if replies.write_all(&(reply.len() as u32).to_le_bytes()).await.is_err() {
			return;
		}
		let _ = replies.write_all(&reply).await;
		let _ = replies.flush().await;
	}
}

fn storefront(action: &str, args: &Value) -> Option<Value> {
	match action {
		"click" | "type" | "hover" | "press" => Some(Value::Null),
		"isVisible" => Some(json!(args["selector"] != "#spinner")),
		"evaluate" => match args["expression"].as_str()? {
			"document.title" => Some(json!("Storefront")),
			"cart.count" => Some(json!(2)),
			"never" => None,
			_ => Some(json!(true)),
		},
		"extract" => Some(json!("$42.00")),
		"boundingBox" => Some(json!({ "x": 0, "y": 0, "width": 8, "height": 8 })),
		"screenshot" => Some(json!({ "binary": base64::prelude::BASE64_STANDARD.encode(b"\x89PNG fake") })),
		_ => None,
	}
}

fn registry_with(scripts: &[Value], provider: Arc<FakeDriverProvider>) -> SessionRegistry {
	let repository = InMemoryScriptRepository::new();
	for script in scripts {
		repository.insert(serde_json::from_value(script.clone()).unwrap());
	}
	SessionRegistry::new(Arc::new(repository), provider)
}

#[tokio::test]
async fn test_full_script_over_pipes() {
	let dir = tempfile::tempdir().unwrap();
	let provider = FakeDriverProvider::new(storefront);
	let registry = registry_with(
		&[json!({
			"id": "checkout",
			"tasks": [
				{
					"id": "browse",
					"steps": [
						{ "action": "waitForVisibility", "selector": "#catalog" },
						{ "action": "waitForHidden", "selector": "#spinner" },
						{ "action": "click", "selector": "#add", "postCondition": "cart.ready" },
						{ "action": "assert", "condition": "cart.count", "expected": 2.0 }
					]
				},
				{
					"id": "pay",
					"dependsOn": ["browse"],
					"steps": [
						{ "action": "type", "selector": "#card", "text": "4242" },
						{ "action": "extract", "selector": "#total" },
						{ "action": "screenshot", "selector": "#receipt", "path": "receipt.png" },
						{ "action": "screenshot" }
					]
				}
			]
		})],
		Arc::clone(&provider),
	);
	let events = Arc::new(Mutex::new(Vec::<RegistryEvent>::new()));
	let _subscription = registry.on({
		let events = Arc::clone(&events);
		move |event| events.lock().push(event.clone())
	});

	let options = ExecutionOptions::default().with_screenshot_dir(dir.path());
	let id = registry
		.create_session(SessionConfig::new("checkout").with_options(options))
		.await
		.unwrap();
	let summary = registry.start_session(&id).await.unwrap();

	assert!(summary.success, "{:?}", registry.snapshot(&id).unwrap().results);
	assert_eq!(summary.executed_steps, 8);

	let snapshot = registry.snapshot(&id).unwrap();
	assert_eq!(snapshot.state, SessionState::Completed);
	assert_eq!(snapshot.results["1:1"].value, Some(json!("$42.00")));
	assert_eq!(snapshot.results["1:3"].value, Some(json!({ "skipped": true })));

	let written = std::fs::read(dir.path().join("receipt.png")).unwrap();
	assert_eq!(written, b"\x89PNG fake");
	assert_eq!(snapshot.results["1:2"].value.as_ref().unwrap()["byteSize"], written.len());

	let step_completes = events.lock().iter().filter(|e| e.event.kind() == "step-complete").count();
	assert_eq!(step_completes, snapshot.results.len());

	registry.dispose_all().await.unwrap();
	assert_eq!(provider.connections.lock()[0].pending_count(), 0);
}

#[tokio::test]
async fn test_unanswered_call_times_out_without_leaking() {
	let provider = FakeDriverProvider::new(storefront);
	let registry = registry_with(
		&[json!({
			"id": "flaky",
			"tasks": [{
				"id": "t",
				"steps": [
					{ "action": "evaluate", "code": "never", "timeoutMs": 50 },
					{ "action": "evaluate", "code": "document.title" }
				]
			}]
		})],
		Arc::clone(&provider),
	);
	let options = ExecutionOptions::default().with_stop_on_error(StopOnError::Continue);
	let id = registry
		.create_session(SessionConfig::new("flaky").with_options(options))
		.await
		.unwrap();

	let summary = registry.start_session(&id).await.unwrap();

	assert!(!summary.success);
	let snapshot = registry.snapshot(&id).unwrap();
	let failed = &snapshot.results["0:0"];
	assert!(!failed.success);
	assert!(failed.error.as_deref().unwrap().to_lowercase().contains("timeout"));
	assert_eq!(snapshot.results["0:1"].value, Some(json!("Storefront")));
	assert_eq!(provider.connections.lock()[0].pending_count(), 0);

	registry.dispose_all().await.unwrap();
}

#[tokio::test]
async fn test_stop_mid_wait_releases_pipe_surface() {
	let provider = FakeDriverProvider::new(|action, _args| match action {
		"isVisible" => Some(json!(false)),
		_ => Some(Value::Null),
	});
	let registry = Arc::new(registry_with(
		&[json!({
			"id": "stuck",
			"tasks": [{ "id": "t", "steps": [{ "action": "waitForVisibility", "selector": "#never-shown" }] }]
		})],
		Arc::clone(&provider),
	));
	let id = registry.create_session(SessionConfig::new("stuck")).await.unwrap();

	let run = tokio::spawn({
		let registry = Arc::clone(&registry);
		let id = id.clone();
		async move { registry.start_session(&id).await }
	});
	tokio::time::sleep(Duration::from_millis(150)).await;
	assert_eq!(registry.snapshot(&id).unwrap().state, SessionState::Running);

	tokio::time::timeout(Duration::from_secs(2), registry.stop_session(&id))
		.await
		.unwrap()
		.unwrap();

	let summary = run.await.unwrap().unwrap();
	assert!(summary.aborted);
	assert_eq!(registry.snapshot(&id).unwrap().state, SessionState::Idle);
	assert!(registry.snapshot(&id).unwrap().results.is_empty());

	let connection = Arc::clone(&provider.connections.lock()[0]);
	assert_eq!(connection.pending_count(), 0);
	let after_close = connection
		.call("click", json!({ "selector": "#late" }), None, Duration::from_millis(200))
		.await;
	assert!(after_close.is_err());
}
