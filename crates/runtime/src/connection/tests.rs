use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::*;
use crate::transport::PipeTransport;

fn create_test_connection() -> (Arc<Connection>, DuplexStream, DuplexStream) {
	let (to_surface, surface_in) = tokio::io::duplex(64 * 1024);
	let (from_surface, surface_out) = tokio::io::duplex(64 * 1024);

	let (transport, message_rx) = PipeTransport::new(surface_in, from_surface);
	let parts = transport.into_transport_parts(message_rx);

	(Arc::new(Connection::new(parts)), to_surface, surface_out)
}

async fn read_request(reader: &mut DuplexStream) -> Request {
	let mut len_buf = [0u8; 4];
	reader.read_exact(&mut len_buf).await.unwrap();
	let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
	reader.read_exact(&mut body).await.unwrap();
	serde_json::from_slice(&body).unwrap()
}

async fn write_message(writer: &mut DuplexStream, message: Value) {
	let bytes = serde_json::to_vec(&message).unwrap();
	writer.write_all(&(bytes.len() as u32).to_le_bytes()).await.unwrap();
	writer.write_all(&bytes).await.unwrap();
	writer.flush().await.unwrap();
}

#[test]
fn test_request_serializes_target_only_when_set() {
	let request = Request {
		id: 3,
		action: "click".to_string(),
		args: json!({"selector": "#go"}),
		target: None,
		metadata: Metadata::now(),
	};
	let value = serde_json::to_value(&request).unwrap();
	assert_eq!(value["id"], 3);
	assert_eq!(value["action"], "click");
	assert!(value.get("target").is_none());
	assert!(value["metadata"]["wallTime"].as_i64().unwrap() > 0);
}

#[test]
fn test_message_classification() {
	let reply: Message = serde_json::from_str(r#"{"id": 42, "result": {"ok": true}}"#).unwrap();
	assert!(matches!(reply, Message::Response(Response { id: 42, .. })));

	let event: Message = serde_json::from_str(r#"{"method": "navigated", "params": {"url": "app://home"}}"#).unwrap();
	match event {
		Message::Event(event) => {
			assert_eq!(event.method, "navigated");
			assert_eq!(event.params["url"], "app://home");
		}
		other => panic!("expected Event, got {other:?}"),
	}

	let unknown: Message = serde_json::from_str(r#"[1, 2, 3]"#).unwrap();
	assert!(matches!(unknown, Message::Unknown(_)));
}

#[tokio::test]
async fn test_dispatch_delivers_result() {
	let (connection, _, _) = create_test_connection();

	let (tx, rx) = oneshot::channel();
	connection.callbacks.insert(9, tx);

	connection.dispatch(Message::Response(Response {
		id: 9,
		result: Some(json!({"value": 12})),
		error: None,
	}));

	assert_eq!(rx.await.unwrap().unwrap()["value"], 12);
	assert_eq!(connection.pending_count(), 0);
}

#[tokio::test]
async fn test_dispatch_delivers_remote_error() {
	let (connection, _, _) = create_test_connection();

	let (tx, rx) = oneshot::channel();
	connection.callbacks.insert(1, tx);

	connection.dispatch(Message::Response(Response {
		id: 1,
		result: None,
		error: Some(ErrorWrapper {
			error: ErrorPayload {
				message: "no element matches #missing".to_string(),
				name: None,
				stack: None,
			},
		}),
	}));

	let err = rx.await.unwrap().unwrap_err();
	assert_eq!(err.error_name(), Some("Error"));
	assert!(err.to_string().contains("#missing"));
}

#[tokio::test]
async fn test_dispatch_ignores_unknown_reply() {
	let (connection, _, _) = create_test_connection();
	connection.dispatch(Message::Response(Response {
		id: 999,
		result: Some(json!(true)),
		error: None,
	}));
	assert_eq!(connection.pending_count(), 0);
}

#[tokio::test]
async fn test_invoke_round_trip_through_surface() {
	let (connection, mut to_surface, mut surface_out) = create_test_connection();
	let runner = Arc::clone(&connection);
	tokio::spawn(async move { runner.run().await });

	let surface = tokio::spawn(async move {
		let request = read_request(&mut to_surface).await;
		assert_eq!(request.action, "evaluate");
		assert_eq!(request.target.as_deref(), Some("frame-2"));
		write_message(&mut surface_out, json!({"id": request.id, "result": 42})).await;
		(to_surface, surface_out)
	});

	let value = connection
		.call("evaluate", json!({"expression": "6 * 7"}), Some("frame-2"), Duration::from_secs(2))
		.await
		.unwrap();
	assert_eq!(value, json!(42));
	assert_eq!(connection.pending_count(), 0);
	let _ = surface.await.unwrap();
}

#[tokio::test]
async fn test_timeout_removes_handler_and_late_reply_is_dropped() {
	let (connection, mut to_surface, mut surface_out) = create_test_connection();
	let runner = Arc::clone(&connection);
	tokio::spawn(async move { runner.run().await });

	let err = connection
		.call("click", json!({"selector": "#never"}), None, Duration::from_millis(50))
		.await
		.unwrap_err();
	assert!(err.is_timeout());
	assert!(err.to_string().contains("timeout"));
	assert_eq!(connection.pending_count(), 0);

	let stale = read_request(&mut to_surface).await;

	let surface = tokio::spawn(async move {
		write_message(&mut surface_out, json!({"id": stale.id, "result": "late"})).await;
		let fresh = read_request(&mut to_surface).await;
		assert_ne!(fresh.id, stale.id);
		write_message(&mut surface_out, json!({"id": fresh.id, "result": "fresh"})).await;
		(to_surface, surface_out)
	});

	let value = connection
		.call("click", json!({"selector": "#now"}), None, Duration::from_secs(2))
		.await
		.unwrap();
	assert_eq!(value, json!("fresh"));
	assert_eq!(connection.pending_count(), 0);
	let _ = surface.await.unwrap();
}

#[tokio::test]
async fn test_dropped_call_cleans_up_handler() {
	let (connection, _to_surface, _surface_out) = create_test_connection();

	let call = connection.call("hover", json!({}), None, Duration::from_secs(30));
	let _ = tokio::time::timeout(Duration::from_millis(10), call).await;

	assert_eq!(connection.pending_count(), 0);
}

#[tokio::test]
async fn test_shutdown_fails_pending_calls() {
	let (connection, _to_surface, _surface_out) = create_test_connection();

	let caller = Arc::clone(&connection);
	let call = tokio::spawn(async move { caller.call("type", json!({}), None, Duration::from_secs(30)).await });

	while connection.pending_count() == 0 {
		tokio::task::yield_now().await;
	}
	connection.shutdown();

	let err = call.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::ChannelClosed));
}

#[tokio::test]
async fn test_surface_events_are_broadcast() {
	let (connection, _to_surface, mut surface_out) = create_test_connection();
	let mut events = connection.events();
	let runner = Arc::clone(&connection);
	tokio::spawn(async move { runner.run().await });

	write_message(&mut surface_out, json!({"method": "dialog", "params": {"text": "Saved"}})).await;

	let event = events.recv().await.unwrap();
	assert_eq!(event.method, "dialog");
	assert_eq!(event.params["text"], "Saved");
}

#[tokio::test]
async fn test_run_twice_is_rejected() {
	let (connection, _to_surface, surface_out) = create_test_connection();
	let runner = Arc::clone(&connection);
	let first = tokio::spawn(async move { runner.run().await });

	tokio::task::yield_now().await;
	let second = connection.run().await;
	assert!(matches!(second, Err(Error::ProtocolError(_))));

	drop(surface_out);
	assert!(first.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_disconnect_fails_outstanding_invocations() {
	let (connection, _to_surface, surface_out) = create_test_connection();
	let runner = Arc::clone(&connection);
	let run = tokio::spawn(async move { runner.run().await });

	let caller = Arc::clone(&connection);
	let call = tokio::spawn(async move { caller.call("press", json!({"key": "Enter"}), None, Duration::from_secs(30)).await });

	while connection.pending_count() == 0 {
		tokio::task::yield_now().await;
	}
	drop(surface_out);

	let err = call.await.unwrap().unwrap_err();
	assert!(err.is_closed());
	let _ = run.await;
}
