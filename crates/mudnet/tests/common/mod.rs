//! A RESTCONF controller double served with axum on an ephemeral port.

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use axum::{Json, Router};
use mudnet::{ControllerClient, ControllerConfig};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// base64("admin:admin")
const ADMIN_AUTH: &str = "Basic YWRtaW46YWRtaW4=";

pub const MUD_URL: &str = "https://mudfiles.example.com/toaster.json";

#[derive(Debug, Default)]
pub struct ControllerState {
    pub config: BTreeMap<String, Value>,
    pub quarantined: Vec<String>,
    pub clears: usize,
    pub puts: usize,
    /// Empty `get-mud-urls` answers to give before the report shows up.
    pub empty_polls: usize,
    pub never_report: bool,
    /// `get-mud-urls` answers to cut off mid-response before answering.
    pub broken_polls: usize,
    /// Answer `get-mud-urls` with an HTML error page.
    pub garbage_polls: bool,
    pub polls: usize,
    pub operations: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeController {
    state: Arc<Mutex<ControllerState>>,
}

impl FakeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap()
    }

    /// Serves the controller and returns its RESTCONF root.
    pub async fn serve(&self) -> String {
        let app = Router::new()
            .route("/restconf/config/{resource}", put(put_config))
            .route("/restconf/operations/{operation}", post(operation))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/restconf")
    }

    /// Serves the controller and returns a client for it with fast retries.
    pub async fn client(&self) -> ControllerClient {
        let base_url = self.serve().await;
        ControllerClient::new(ControllerConfig {
            backoff_ms: 10,
            ..ControllerConfig::for_address(&base_url)
        })
        .unwrap()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(ADMIN_AUTH)
}

async fn put_config(
    State(controller): State<FakeController>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut state = controller.state();
    state.puts += 1;
    if resource == "nist-mud-device-association:quarantine-device" {
        state.quarantined = body["quarantine-device"]["device-mac-addresses"]
            .as_array()
            .map(|macs| {
                macs.iter()
                    .filter_map(|m| m.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
    }
    state.config.insert(resource, body);
    StatusCode::OK.into_response()
}

async fn operation(
    State(controller): State<FakeController>,
    Path(operation): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut state = controller.state();
    state.operations.push(operation.clone());
    let input = &body["input"];

    let output = match operation.as_str() {
        "sdnmud:clear-mud-rules" => {
            state.clears += 1;
            json!({})
        }
        "sdnmud:get-quarantine-macs" => {
            json!({ "device-mac-addresses": state.quarantined.clone() })
        }
        "sdnmud:unquarantine" => {
            let mac = input["device-mac-address"].as_str().unwrap_or_default();
            state.quarantined.retain(|m| m != mac);
            json!({})
        }
        "sdnmud:get-mud-urls" => {
            state.polls += 1;
            if state.broken_polls > 0 {
                state.broken_polls -= 1;
                return broken_response();
            }
            if state.garbage_polls {
                return (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "text/html")],
                    "<html><body>Service Unavailable</body></html>",
                )
                    .into_response();
            }
            if input.get("mud-url").is_some() {
                // Log pulls for a known URL are exhausted after one report.
                json!({})
            } else if state.never_report || state.empty_polls > 0 {
                state.empty_polls = state.empty_polls.saturating_sub(1);
                json!({})
            } else {
                json!({ "report": { "mud-url": MUD_URL, "dropped-packets": 0 } })
            }
        }
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    Json(json!({ "output": output })).into_response()
}

/// A response whose body fails after the headers, which the client sees as
/// a dropped connection.
fn broken_response() -> Response {
    let body = futures::stream::once(async {
        Err::<Bytes, _>(std::io::Error::other("connection reset"))
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(body))
        .unwrap()
}
