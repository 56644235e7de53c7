//! REST client for the MUD policy controller.
//!
//! Every request carries Basic credentials and a JSON content type. Non-2xx
//! responses become [`Error::Request`]; connection-level failures are retried
//! with capped exponential backoff and surface as
//! [`Error::ControllerUnreachable`] once the retry budget is spent.

use mudnet_core::{Error, MacAddr, Result};
use reqwest::{Method, header};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const RESTCONF_PORT: u16 = 8181;
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Well-known configuration resources.
pub mod resources {
    pub const DEVICE_ASSOCIATION: &str = "nist-mud-device-association:mapping";
    pub const CONTROLLER_CLASS: &str = "nist-mud-controllerclass-mapping:controllerclass-mapping";
    pub const SDNMUD_CONFIG: &str = "sdnmud:sdnmud-config";
    pub const QUARANTINE_DEVICE: &str = "nist-mud-device-association:quarantine-device";
}

mod operations {
    pub const GET_MUD_URLS: &str = "sdnmud:get-mud-urls";
    pub const UNQUARANTINE: &str = "sdnmud:unquarantine";
    pub const CLEAR_MUD_RULES: &str = "sdnmud:clear-mud-rules";
    pub const GET_QUARANTINE_MACS: &str = "sdnmud:get-quarantine-macs";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// RESTCONF root, e.g. `http://127.0.0.1:8181/restconf`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Extra attempts after a transport failure.
    pub retries: u32,
    pub backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::for_address("127.0.0.1")
    }
}

impl ControllerConfig {
    /// Config for a controller host, using the standard RESTCONF port.
    pub fn for_address(addr: &str) -> Self {
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else if addr.contains(':') {
            format!("http://{addr}/restconf")
        } else {
            format!("http://{addr}:{RESTCONF_PORT}/restconf")
        };
        Self {
            base_url,
            username: "admin".to_string(),
            password: "admin".to_string(),
            retries: 3,
            backoff_ms: 500,
            request_timeout_secs: 30,
        }
    }

    fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// A non-empty `get-mud-urls` answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MudReport {
    /// The `report.mud-url` field, when present.
    pub mud_url: Option<String>,
    /// The full `output` object.
    pub output: Value,
}

impl MudReport {
    fn from_output(output: Value) -> Self {
        let mud_url = output
            .get("report")
            .and_then(|r| r.get("mud-url"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Self { mud_url, output }
    }

    pub fn has_report(&self) -> bool {
        self.output.get("report").is_some()
    }
}

pub struct ControllerClient {
    http: reqwest::Client,
    config: ControllerConfig,
    /// Serializes read-modify-write updates of the quarantine set.
    quarantine_lock: Mutex<()>,
}

impl ControllerClient {
    pub fn new(config: ControllerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            http,
            config,
            quarantine_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// One request, no retries. `Value::Null` for an empty 2xx body.
    async fn send_once(&self, method: Method, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        debug!(%method, %url, "controller request");

        let response = self
            .http
            .request(method, &url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{url}: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("{url}: {e}")))?;

        if !status.is_success() {
            return Err(Error::Request {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| Error::Protocol(format!("{url}: {e}: {text}")))
    }

    /// Sends with transport retries and backoff.
    async fn send(&self, method: Method, path: &str, body: &Value) -> Result<Value> {
        let mut backoff = self.config.backoff();
        let mut attempt = 0;
        loop {
            match self.send_once(method.clone(), path, body).await {
                Err(e) if e.is_retryable() && attempt < self.config.retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "controller request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(Error::Transport(msg)) => return Err(Error::ControllerUnreachable(msg)),
                other => return other,
            }
        }
    }

    async fn operation(&self, name: &str, input: Value) -> Result<Value> {
        let response = self
            .send(
                Method::POST,
                &format!("operations/{name}"),
                &json!({ "input": input }),
            )
            .await?;
        output_of(response)
    }

    /// Replaces the configuration stored at `resource` with `document`.
    pub async fn upload_configuration(&self, resource: &str, document: &Value) -> Result<()> {
        info!(resource, "uploading configuration");
        self.send(Method::PUT, &format!("config/{resource}"), document)
            .await?;
        Ok(())
    }

    /// Resets controller-side derived policy state.
    pub async fn clear_rules(&self) -> Result<()> {
        info!("clearing MUD rules");
        self.operation(operations::CLEAR_MUD_RULES, json!({})).await?;
        Ok(())
    }

    /// The MACs the controller currently holds in quarantine.
    pub async fn get_quarantine_macs(&self) -> Result<Vec<MacAddr>> {
        let output = self
            .operation(operations::GET_QUARANTINE_MACS, json!({}))
            .await?;
        let Some(list) = output.get("device-mac-addresses") else {
            return Ok(Vec::new());
        };
        let list = list.as_array().ok_or_else(|| {
            Error::Protocol(format!("device-mac-addresses is not a list: {list}"))
        })?;
        list.iter()
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| Error::Protocol(format!("not a MAC address: {v}")))?
                    .parse()
                    .map_err(|e| Error::Protocol(format!("{e}")))
            })
            .collect()
    }

    /// Adds `mac` to the quarantine set. Does not wait for propagation.
    pub async fn quarantine(&self, mac: MacAddr) -> Result<()> {
        let _guard = self.quarantine_lock.lock().await;
        let mut macs = self.get_quarantine_macs().await?;
        if macs.contains(&mac) {
            debug!(%mac, "already quarantined");
            return Ok(());
        }
        macs.push(mac);
        info!(%mac, "quarantining device");

        let addresses: Vec<String> = macs.iter().map(MacAddr::to_string).collect();
        self.upload_configuration(
            resources::QUARANTINE_DEVICE,
            &json!({ "quarantine-device": { "device-mac-addresses": addresses } }),
        )
        .await
    }

    /// Releases `mac` from quarantine. Does not wait for propagation.
    pub async fn unquarantine(&self, mac: MacAddr) -> Result<()> {
        let _guard = self.quarantine_lock.lock().await;
        info!(%mac, "unquarantining device");
        self.operation(
            operations::UNQUARANTINE,
            json!({ "device-mac-address": mac.to_string() }),
        )
        .await?;
        Ok(())
    }

    /// Polls `get-mud-urls` until the controller returns a non-empty answer.
    ///
    /// An empty `{"output": {}}` means "keep polling"; transport failures
    /// are retried; malformed responses end the poll. Fails with
    /// [`Error::PropagationTimeout`] once `deadline` passes, never later.
    pub async fn poll_mud_report(
        &self,
        mud_urls: &[String],
        poll_interval: Duration,
        deadline: Instant,
    ) -> Result<MudReport> {
        let input = if mud_urls.is_empty() {
            json!({})
        } else {
            json!({ "mud-url": mud_urls })
        };
        let body = json!({ "input": input });
        let path = format!("operations/{}", operations::GET_MUD_URLS);

        let mut interval = poll_interval;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timeout_error(attempt - 1));
            }

            match tokio::time::timeout(remaining, self.send_once(Method::POST, &path, &body)).await
            {
                Err(_) => return Err(timeout_error(attempt)),
                Ok(Ok(response)) => {
                    let output = output_of(response)?;
                    if !is_empty_output(&output) {
                        debug!(attempt, "MUD report available");
                        return Ok(MudReport::from_output(output));
                    }
                    debug!(attempt, "no MUD report yet");
                }
                Ok(Err(e)) if e.is_retryable() => {
                    warn!(error = %e, attempt, "MUD report poll failed, retrying");
                }
                Ok(Err(e)) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(timeout_error(attempt));
            }
            tokio::time::sleep_until(deadline.min(now + interval)).await;
            interval = (interval * 2).min(MAX_BACKOFF);
        }
    }

    /// Waits for the first report, then keeps pulling the log for its MUD URL
    /// until the controller stops returning a report.
    pub async fn collect_mud_reports(
        &self,
        poll_interval: Duration,
        deadline: Instant,
    ) -> Result<Vec<MudReport>> {
        let first = self.poll_mud_report(&[], poll_interval, deadline).await?;
        let mut reports = vec![first];

        while let Some(url) = reports.last().and_then(|r| r.mud_url.clone()) {
            tokio::time::sleep_until(deadline.min(Instant::now() + poll_interval)).await;
            let next = tokio::time::timeout_at(
                deadline,
                self.operation(operations::GET_MUD_URLS, json!({ "mud-url": [url] })),
            )
            .await;
            let output = match next {
                Ok(result) => result?,
                Err(_) => {
                    warn!(collected = reports.len(), "deadline reached while pulling logs");
                    break;
                }
            };
            let report = MudReport::from_output(output);
            if !report.has_report() {
                break;
            }
            reports.push(report);
        }

        Ok(reports)
    }
}

fn timeout_error(attempts: u32) -> Error {
    Error::PropagationTimeout(format!(
        "no MUD report after {attempts} poll attempt(s)"
    ))
}

/// Extracts the `output` object of an operation response.
fn output_of(response: Value) -> Result<Value> {
    match response {
        Value::Null => Ok(json!({})),
        Value::Object(mut map) => match map.remove("output") {
            Some(output @ Value::Object(_)) => Ok(output),
            Some(other) => Err(Error::Protocol(format!("output is not an object: {other}"))),
            None if map.is_empty() => Ok(json!({})),
            None => Err(Error::Protocol(format!(
                "response has no output: {}",
                Value::Object(map)
            ))),
        },
        other => Err(Error::Protocol(format!("unexpected response: {other}"))),
    }
}

fn is_empty_output(output: &Value) -> bool {
    output.as_object().is_none_or(|o| o.is_empty())
}
