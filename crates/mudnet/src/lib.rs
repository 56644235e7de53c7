//! Provisioning and policy verification harness for MUD-enforcing SDN
//! controllers.
//!
//! mudnet builds an emulated network of hosts and OpenFlow switches, points
//! the switches at a controller, pushes MUD policy documents over the
//! controller's REST interface and then checks, probe by probe, that traffic
//! is allowed or blocked as the policy says it should be.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mudnet::{ControllerClient, ControllerConfig, Orchestrator, ScenarioFile, select_backend};
//! use std::sync::Arc;
//!
//! # async fn example() -> mudnet::Result<()> {
//! let mut scenario = ScenarioFile::load("scenarios/quarantine/scenario.toml".as_ref())?;
//! scenario.default_controller_host("10.0.4.3".parse().unwrap());
//! scenario.validate()?;
//!
//! let controller = ControllerClient::new(ControllerConfig::for_address("10.0.4.3"))?;
//! let orchestrator = Orchestrator::new(select_backend()?, Arc::new(controller));
//!
//! let report = orchestrator.run(&scenario).await;
//! println!("{}", report.render_text());
//! # Ok(())
//! # }
//! ```
//!
//! The pieces can also be used on their own: [`Provisioner`] returns a
//! [`LiveNetwork`] that stays up until [`LiveNetwork::teardown`], and
//! [`ProbeRunner`] runs individual probes against it.

mod backend;
mod controller;
mod live;
mod probe;
mod provision;
mod scenario;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backend::{NetnsBackend, available_backends, select_backend};
pub use controller::{ControllerClient, ControllerConfig, MudReport, resources};
pub use reqwest::Url;
pub use live::{LiveNetwork, TeardownReport};
pub use probe::{ProbeRunner, ToolConfig, command_for, parse_output};
pub use provision::{DEFAULT_CONNECT_TIMEOUT, HostCommand, Provisioner, host_commands};
pub use scenario::{
    Abort, ConfigDocument, DocumentKind, GroupReport, Orchestrator, ProbeGroup, Scenario,
    ScenarioFile, ScenarioReport, ScenarioState, ScenarioTiming, Transition, TransitionAction,
};

// Topology and plan
pub use mudnet_core::{
    AddressPlan, Attachment, DefaultRoute, Dpid, Host, HostConfig, HostHandle, HostPlan,
    InterfaceAddress, InterfaceConfig, Ipv4Cidr, Link, LinkEnd, MacAddr, NodeKind, ResolvedPlan,
    RouterConfig, RouterPlan, ServiceSpec, StaticRoute, Switch, SwitchHandle, Topology,
};

// Controller endpoints
pub use mudnet_core::ControllerEndpoint;

// Backends
pub use mudnet_core::{CommandOutput, NetworkBackend};

// Probes
pub use mudnet_core::{
    ExpectedOutcome, Observation, ProbeKind, ProbeOutcome, ProbeResult, ProbeSpec, ProbeStatus,
};

// Errors
pub use mudnet_core::{Error, Result};

/// Network backends and what they support.
///
/// ```rust,no_run
/// use mudnet::capabilities::available_backends;
///
/// for backend in available_backends() {
///     let caps = backend.capabilities();
///     println!("{}: openflow={} root={}", backend.name(), caps.openflow, caps.requires_root);
/// }
/// ```
pub mod capabilities {
    pub use super::backend::available_backends;
    pub use mudnet_core::{BackendCapabilities, CommandOutput, NetworkBackend, ServiceId};
}
