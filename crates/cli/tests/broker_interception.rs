//! Broker behavior against a scripted in-memory automation endpoint.
//!
//! The endpoint answers every command through a responder table and can emit
//! events after any reply, which is enough to play back whole interception
//! scenarios: background traffic, paused requests, and responses.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::Mutex as TokioMutex;
use underpass::{Browser, Page};
use underpass_cli::broker::InterceptionBroker;
use underpass_cli::config::{FillOrder, SiteProfile};
use underpass_cli::error::AppError;
use underpass_runtime::transport::PipeTransport;
use url::Url;

type Responder = Box<dyn Fn(&str, &Value) -> (Value, Vec<Value>) + Send + Sync>;

struct FakeEndpoint {
	commands: Arc<std::sync::Mutex<Vec<Value>>>,
}

impl FakeEndpoint {
	fn start(responder: Responder) -> (Self, Browser) {
		let (endpoint_read, client_write) = tokio::io::duplex(64 * 1024);
		let (client_read, endpoint_write) = tokio::io::duplex(64 * 1024);

		let parts = PipeTransport::split(client_write, client_read);
		let browser = Browser::from_parts(parts, "ws://fake-endpoint/devtools");

		let commands = Arc::new(std::sync::Mutex::new(Vec::new()));
		let writer = Arc::new(TokioMutex::new(endpoint_write));

		let task_commands = Arc::clone(&commands);
		tokio::spawn(async move {
			let mut lines = BufReader::new(endpoint_read).lines();
			while let Ok(Some(line)) = lines.next_line().await {
				let Ok(command) = serde_json::from_str::<Value>(&line) else {
					continue;
				};
				let id = command["id"].as_u64().unwrap_or(0);
				let method = command["method"].as_str().unwrap_or("").to_string();
				let params = command.get("params").cloned().unwrap_or(Value::Null);
				task_commands.lock().unwrap().push(command);

				let (result, events) = responder(&method, &params);
				let mut writer = writer.lock().await;
				write_line(&mut writer, &json!({ "id": id, "result": result })).await;
				for event in events {
					write_line(&mut writer, &event).await;
				}
			}
		});

		(Self { commands }, browser)
	}

	fn sent(&self, method: &str) -> Vec<Value> {
		self.commands.lock().unwrap().iter().filter(|c| c["method"] == method).cloned().collect()
	}
}

async fn write_line(writer: &mut DuplexStream, value: &Value) {
	let mut line = serde_json::to_vec(value).expect("serializable");
	line.push(b'\n');
	writer.write_all(&line).await.expect("endpoint write");
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

/// Commands every scenario starts with.
fn respond_basics(method: &str) -> Option<Value> {
	match method {
		"Target.getTargets" => Some(json!({
			"targetInfos": [{ "targetId": "T1", "type": "page", "url": "https://app.example.com/feed" }]
		})),
		"Target.attachToTarget" => Some(json!({ "sessionId": "S1" })),
		"Page.enable" | "Runtime.enable" | "Network.enable" | "Fetch.enable" => Some(json!({})),
		"Runtime.evaluate" => Some(json!({ "result": { "value": null } })),
		_ => None,
	}
}

fn paused(request_id: &str, url: &str, body: &str) -> Value {
	json!({
		"method": "Fetch.requestPaused",
		"sessionId": "S1",
		"params": {
			"requestId": request_id,
			"request": { "url": url, "method": "POST", "postData": body }
		}
	})
}

fn response_received(request_id: &str, url: &str) -> Value {
	json!({
		"method": "Network.responseReceived",
		"sessionId": "S1",
		"params": {
			"requestId": request_id,
			"response": { "url": url, "status": 200 }
		}
	})
}

async fn attach_page(browser: &Browser) -> Page {
	browser.page().await.expect("attach page")
}

#[tokio::test]
async fn query_is_swapped_in_and_response_correlated() {
	let (endpoint, browser) = FakeEndpoint::start(Box::new(|method, params| {
		if let Some(result) = respond_basics(method) {
			return (result, vec![]);
		}
		match method {
			"Page.navigate" => (
				json!({ "frameId": "F1" }),
				vec![
					// Background response with a data payload, observed before
					// any swap: must never satisfy the correlation.
					response_received("R-bad", "https://api.example.com/graphql"),
					// Traffic to an unrelated host: passes through untouched.
					paused("R-other", "https://cdn.example.com/bundle.js", "{}"),
					// The application's own call to the protected host.
					paused("R1", "https://api.example.com/graphql", "{\"query\":\"query Original { viewer { id } }\"}"),
					// A second call after the slot is consumed: untouched.
					paused("R2", "https://api.example.com/graphql", "{\"query\":\"query Original { viewer { id } }\"}"),
				],
			),
			"Fetch.continueRequest" => {
				let events = if params["requestId"] == "R1" {
					vec![
						response_received("R-empty", "https://api.example.com/graphql"),
						response_received("R-good", "https://api.example.com/graphql"),
					]
				} else {
					vec![]
				};
				(json!({}), events)
			}
			"Network.getResponseBody" => {
				let body = match params["requestId"].as_str() {
					Some("R-empty") => "{\"errors\":[{\"message\":\"rate limited\"}]}",
					Some("R-good") => "{\"data\":{\"jobs\":[{\"id\":\"j1\"}]}}",
					other => panic!("body fetched for unexpected request {other:?}"),
				};
				(json!({ "body": body, "base64Encoded": false }), vec![])
			}
			other => panic!("unexpected command {other}"),
		}
	}));

	let page = attach_page(&browser).await;
	let broker = InterceptionBroker::with_timeout(Duration::from_secs(5));

	let mut variables = Map::new();
	variables.insert("first".to_string(), json!(10));
	let data = broker
		.execute(&page, &profile(), "query Jobs { jobs { id } }", variables)
		.await
		.expect("query should resolve");

	assert_eq!(data["data"]["jobs"][0]["id"], "j1");
	assert!(!broker.slot().is_occupied(), "slot must be released");

	// Exactly one request got the swapped body; the others passed untouched.
	let continues = endpoint.sent("Fetch.continueRequest");
	assert_eq!(continues.len(), 3);
	for cont in &continues {
		let request_id = cont["params"]["requestId"].as_str().unwrap();
		if request_id == "R1" {
			assert_eq!(cont["params"]["url"], "https://api.example.com/graphql");
			let encoded = cont["params"]["postData"].as_str().unwrap();
			let body: Value = serde_json::from_slice(&BASE64.decode(encoded).unwrap()).unwrap();
			assert_eq!(body["query"], "query Jobs { jobs { id } }");
			assert_eq!(body["variables"]["first"], 10);
		} else {
			assert!(cont["params"].get("postData").is_none(), "{request_id} must keep its body");
			assert!(cont["params"].get("url").is_none(), "{request_id} must keep its url");
		}
	}

	// The pre-swap response was never even inspected.
	let bodies = endpoint.sent("Network.getResponseBody");
	assert!(bodies.iter().all(|c| c["params"]["requestId"] != "R-bad"));
}

#[tokio::test]
async fn no_traffic_is_reported_as_no_interceptable_call() {
	let (_endpoint, browser) = FakeEndpoint::start(Box::new(|method, _| {
		if let Some(result) = respond_basics(method) {
			return (result, vec![]);
		}
		match method {
			"Page.navigate" => (json!({ "frameId": "F1" }), vec![]),
			other => panic!("unexpected command {other}"),
		}
	}));

	let page = attach_page(&browser).await;
	let broker = InterceptionBroker::with_timeout(Duration::from_millis(300));

	let err = broker
		.execute(&page, &profile(), "query Jobs { jobs { id } }", Map::new())
		.await
		.unwrap_err();

	assert!(matches!(err, AppError::NoInterceptableCall), "got {err:?}");
	assert!(!broker.slot().is_occupied(), "timeout must clear the slot");
}

#[tokio::test]
async fn swapped_but_unanswered_query_times_out() {
	let (_endpoint, browser) = FakeEndpoint::start(Box::new(|method, _| {
		if let Some(result) = respond_basics(method) {
			return (result, vec![]);
		}
		match method {
			"Page.navigate" => (
				json!({ "frameId": "F1" }),
				vec![paused("R1", "https://api.example.com/graphql", "{}")],
			),
			// The swap goes through, but no response ever comes back.
			"Fetch.continueRequest" => (json!({}), vec![]),
			other => panic!("unexpected command {other}"),
		}
	}));

	let page = attach_page(&browser).await;
	let broker = InterceptionBroker::with_timeout(Duration::from_millis(750));

	let err = broker
		.execute(&page, &profile(), "query Jobs { jobs { id } }", Map::new())
		.await
		.unwrap_err();

	assert!(matches!(err, AppError::QueryTimeout { .. }), "got {err:?}");
	assert!(!broker.slot().is_occupied(), "timeout must clear the slot");
}

#[tokio::test]
async fn concurrent_queries_are_rejected_not_stomped() {
	let (_endpoint, browser) = FakeEndpoint::start(Box::new(|method, _| {
		if let Some(result) = respond_basics(method) {
			return (result, vec![]);
		}
		(json!({}), vec![])
	}));

	let page = attach_page(&browser).await;
	let broker = InterceptionBroker::with_timeout(Duration::from_millis(300));

	// Simulate an in-flight query by occupying the slot directly.
	broker
		.slot()
		.try_set(underpass_cli::broker::PendingQuery {
			endpoint: Url::parse("https://api.example.com/graphql").unwrap(),
			payload: underpass_protocol::query::QueryPayload::new("query A { a }", Map::new()),
			deadline: tokio::time::Instant::now() + Duration::from_secs(30),
		})
		.unwrap();

	let err = broker.execute(&page, &profile(), "query B { b }", Map::new()).await.unwrap_err();
	assert!(matches!(err, AppError::QueryInFlight), "got {err:?}");
	// The first caller's pending query is untouched.
	assert!(broker.slot().is_occupied());
}
