//! Session acquisition order against a local WebSocket endpoint.
//!
//! A real listener stands in for the remote automation endpoint so the
//! manager's reconnect and login paths run the same transport they use in
//! production. The responder answers each command and may emit events after
//! its reply (load notifications, for instance).

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use underpass_cli::config::{Config, Credentials, FillOrder, SiteProfile};
use underpass_cli::error::AppError;
use underpass_cli::session::SessionManager;
use underpass_cli::session::store::now_ms;
use url::Url;

type Responder = Arc<dyn Fn(&str, &Value) -> (Value, Vec<Value>) + Send + Sync>;

/// Serves scripted command replies over WebSocket; counts connections.
async fn spawn_endpoint(responder: Responder) -> (String, Arc<AtomicU32>) {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let port = listener.local_addr().expect("addr").port();
	let connections = Arc::new(AtomicU32::new(0));

	let task_connections = Arc::clone(&connections);
	tokio::spawn(async move {
		while let Ok((stream, _)) = listener.accept().await {
			task_connections.fetch_add(1, Ordering::SeqCst);
			let responder = Arc::clone(&responder);
			tokio::spawn(async move {
				let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
					return;
				};
				let (mut write, mut read) = ws.split();
				while let Some(Ok(frame)) = read.next().await {
					let WsMessage::Text(text) = frame else { continue };
					let Ok(command) = serde_json::from_str::<Value>(&text) else {
						continue;
					};
					let id = command["id"].as_u64().unwrap_or(0);
					let method = command["method"].as_str().unwrap_or("");
					let params = command.get("params").cloned().unwrap_or(Value::Null);
					let (result, events) = responder(method, &params);
					let reply = json!({ "id": id, "result": result }).to_string();
					if write.send(WsMessage::Text(reply)).await.is_err() {
						break;
					}
					for event in events {
						if write.send(WsMessage::Text(event.to_string())).await.is_err() {
							return;
						}
					}
				}
			});
		}
	});

	(format!("ws://127.0.0.1:{port}"), connections)
}

fn responder_with_location(location: &'static str) -> Responder {
	Arc::new(move |method, params| {
		let result = match method {
			"Target.getTargets" => json!({
				"targetInfos": [{ "targetId": "T1", "type": "page", "url": location }]
			}),
			"Target.attachToTarget" => json!({ "sessionId": "S1" }),
			"Runtime.evaluate" => {
				let expression = params["expression"].as_str().unwrap_or("");
				if expression == "1 + 1" {
					json!({ "result": { "value": 2 } })
				} else if expression.contains("location.href") {
					json!({ "result": { "value": location } })
				} else {
					json!({ "result": { "value": null } })
				}
			}
			_ => json!({}),
		};
		(result, vec![])
	})
}

/// Plays a cooperative login page: every selector resolves, fills stick, and
/// the post-submit location sits inside the application.
fn responder_for_login() -> Responder {
	Arc::new(|method, params| match method {
		"Target.getTargets" => (
			json!({ "targetInfos": [{ "targetId": "T1", "type": "page", "url": "about:blank" }] }),
			vec![],
		),
		"Target.attachToTarget" => (json!({ "sessionId": "S1" }), vec![]),
		"Page.navigate" => (
			json!({ "frameId": "F1" }),
			vec![json!({ "method": "Page.loadEventFired", "sessionId": "S1", "params": {} })],
		),
		"Runtime.evaluate" => {
			let expression = params["expression"].as_str().unwrap_or("");
			let value = if expression == "1 + 1" {
				json!(2)
			} else if expression.contains("location.href") {
				json!("https://app.example.com/feed")
			} else if expression.contains("el.value : null") {
				// Read-back of a filled field.
				json!("user@example.com")
			} else if expression.contains("!== null") || expression.contains("getOwnPropertyDescriptor") || expression.contains(".click()") {
				json!(true)
			} else {
				json!(null)
			};
			(json!({ "result": { "value": value } }), vec![])
		}
		_ => (json!({}), vec![]),
	})
}

fn profile() -> SiteProfile {
	SiteProfile {
		login_url: "https://app.example.com/login".to_string(),
		app_url_pattern: "https://app.example.com/**".to_string(),
		trigger_url: "https://app.example.com/feed".to_string(),
		api_endpoint: Url::parse("https://api.example.com/graphql").unwrap(),
		fill_order: FillOrder::SecretFirst,
	}
}

fn config(state_file: PathBuf) -> Config {
	// No credentials: the fresh-login step can only fail with ConfigMissing,
	// which makes the step transitions observable in these tests.
	Config {
		credentials: Credentials::default(),
		profile: profile(),
		state_file,
	}
}

#[tokio::test]
async fn valid_descriptor_reconnects_without_login() {
	let (endpoint, connections) = spawn_endpoint(responder_with_location("https://app.example.com/feed")).await;

	let dir = tempfile::tempdir().unwrap();
	let state_file = dir.path().join("session.json");
	let mut manager = SessionManager::new(config(state_file));
	manager.store().save(&endpoint).unwrap();

	let live = manager.acquire().await.expect("reconnect should succeed");
	assert!(live.interception_installed());
	assert_eq!(live.endpoint(), endpoint);
	assert_eq!(connections.load(Ordering::SeqCst), 1);
	assert!(manager.has_live_session());
}

#[tokio::test]
async fn reconnect_outside_application_invalidates_and_moves_on() {
	// The endpoint answers, but the page sits on a logged-out location.
	let (endpoint, connections) = spawn_endpoint(responder_with_location("https://www.example.com/signin")).await;

	let dir = tempfile::tempdir().unwrap();
	let state_file = dir.path().join("session.json");
	let mut manager = SessionManager::new(config(state_file.clone()));
	manager.store().save(&endpoint).unwrap();

	let err = manager.acquire().await.unwrap_err();

	// Exactly one reconnect happened, the descriptor was invalidated, and the
	// next step (fresh login) ran into missing credentials.
	assert!(matches!(err, AppError::ConfigMissing), "got {err:?}");
	assert_eq!(connections.load(Ordering::SeqCst), 1);
	assert_eq!(std::fs::read_to_string(&state_file).unwrap(), "{}");
	assert!(manager.store().load().is_none());
	assert!(!manager.has_live_session());
}

#[tokio::test]
async fn expired_descriptor_is_never_dialed() {
	let (endpoint, connections) = spawn_endpoint(responder_with_location("https://app.example.com/feed")).await;

	let dir = tempfile::tempdir().unwrap();
	let state_file = dir.path().join("session.json");

	// Hand-write a record far past the TTL.
	std::fs::write(
		&state_file,
		json!({ "endpoint": endpoint, "savedAt": 1_000u64 }).to_string(),
	)
	.unwrap();

	let mut manager = SessionManager::new(config(state_file));
	let err = manager.acquire().await.unwrap_err();

	assert!(matches!(err, AppError::ConfigMissing), "got {err:?}");
	assert_eq!(connections.load(Ordering::SeqCst), 0, "an expired descriptor must not be reused");
}

#[tokio::test]
async fn fresh_login_persists_a_descriptor() {
	let (endpoint, connections) = spawn_endpoint(responder_for_login()).await;

	let dir = tempfile::tempdir().unwrap();
	let state_file = dir.path().join("session.json");
	let mut config = config(state_file);
	config.credentials = Credentials {
		identifier: Some("user@example.com".to_string()),
		secret: Some("hunter2".to_string()),
		automation_endpoint: Some(endpoint.clone()),
		solver_key: None,
	};

	let before = now_ms();
	let mut manager = SessionManager::new(config);
	let live = manager.acquire().await.expect("fresh login should succeed");
	let after = now_ms();

	assert!(live.interception_installed());
	assert_eq!(live.endpoint(), endpoint);

	let descriptor = manager.store().load().expect("descriptor persisted");
	assert_eq!(descriptor.endpoint, endpoint);
	assert!(descriptor.saved_at >= before && descriptor.saved_at <= after);
	// One connection serves the whole login; no reconnect ever ran.
	assert_eq!(connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalidate_clears_descriptor_and_live_session() {
	let (endpoint, _connections) = spawn_endpoint(responder_with_location("https://app.example.com/feed")).await;

	let dir = tempfile::tempdir().unwrap();
	let state_file = dir.path().join("session.json");
	let mut manager = SessionManager::new(config(state_file));
	manager.store().save(&endpoint).unwrap();

	manager.acquire().await.expect("reconnect");
	assert!(manager.has_live_session());

	manager.invalidate().await.expect("invalidate");
	assert!(!manager.has_live_session());
	assert!(manager.store().load().is_none());
}
