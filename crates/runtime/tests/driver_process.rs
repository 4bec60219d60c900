//! Drives a real child process over the stdio pipe transport.

#![cfg(unix)]

use std::time::Duration;

use playback_runtime::{Error, Invocation, Invoke, RemoteSurface};
use serde_json::json;

/// `cat` echoes each request frame back verbatim. The echo carries the same
/// id and no `error`, so it correlates as a successful reply with no result.
#[tokio::test]
async fn echo_driver_answers_invocations() {
	let mut surface = RemoteSurface::spawn_driver("cat", std::iter::empty::<&str>())
		.await
		.expect("cat should be available on unix hosts");

	let connection = surface.connection();
	let first = connection
		.invoke(Invocation::new("click", json!({"selector": "#submit"})).with_timeout(Duration::from_secs(5)))
		.await
		.unwrap();
	assert_eq!(first, serde_json::Value::Null);

	let second = connection
		.invoke(Invocation::new("hover", json!({"selector": "#menu"})).with_timeout(Duration::from_secs(5)))
		.await
		.unwrap();
	assert_eq!(second, serde_json::Value::Null);
	assert_eq!(connection.pending_count(), 0);

	surface.close().await.unwrap();
}

#[tokio::test]
async fn driver_that_exits_immediately_is_rejected() {
	let err = RemoteSurface::spawn_driver("true", std::iter::empty::<&str>())
		.await
		.unwrap_err();
	match err {
		Error::LaunchFailed(message) => assert!(message.contains("exited immediately")),
		other => panic!("expected LaunchFailed, got {other:?}"),
	}
}

#[tokio::test]
async fn closing_the_surface_fails_pending_invocations() {
	let mut surface = RemoteSurface::spawn_driver("sleep", ["30"]).await.unwrap();
	let connection = surface.connection();

	let pending = tokio::spawn(async move {
		connection
			.invoke(Invocation::new("evaluate", json!({"expression": "1"})).with_timeout(Duration::from_secs(30)))
			.await
	});
	while surface.connection().pending_count() == 0 {
		tokio::task::yield_now().await;
	}

	surface.close().await.unwrap();
	assert!(pending.await.unwrap().unwrap_err().is_closed());
}
