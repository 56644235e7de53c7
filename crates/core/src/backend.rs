use crate::capabilities::BackendCapabilities;
use crate::error::Result;
use crate::types::{ControllerEndpoint, Dpid, Link};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Captured result of a command run inside a host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit status; `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Handle to a background process started with [`NetworkBackend::spawn`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(pub String);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network emulation substrate the provisioner drives.
///
/// Create operations fail if the object already exists. Destroy and stop
/// operations are idempotent: removing something that is already gone
/// succeeds. Implementations serialize their own internal state changes, so
/// a backend may be shared across concurrently configured hosts.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn capabilities(&self) -> &BackendCapabilities;
    fn is_available(&self) -> bool;

    async fn create_host(&self, name: &str) -> Result<()>;
    async fn create_switch(&self, name: &str, dpid: Option<Dpid>) -> Result<()>;
    async fn create_link(&self, link: &Link) -> Result<()>;

    /// Points the switch at its controllers and starts forwarding.
    async fn start_switch(&self, name: &str, controllers: &[ControllerEndpoint]) -> Result<()>;
    /// Whether the switch currently holds a control connection.
    async fn switch_connected(&self, name: &str) -> Result<bool>;
    async fn stop_switch(&self, name: &str) -> Result<()>;

    /// Runs a command to completion inside a host.
    async fn exec(&self, host: &str, argv: &[String]) -> Result<CommandOutput>;
    /// Starts a long-running process inside a host.
    async fn spawn(&self, host: &str, argv: &[String]) -> Result<ServiceId>;
    async fn stop_service(&self, id: &ServiceId) -> Result<()>;

    async fn destroy_link(&self, link: &Link) -> Result<()>;
    async fn destroy_switch(&self, name: &str) -> Result<()>;
    async fn destroy_host(&self, name: &str) -> Result<()>;
}
