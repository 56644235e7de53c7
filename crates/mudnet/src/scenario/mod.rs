//! Scenario Orchestrator.
//!
//! A scenario runs `Init → Provisioned → Configured → (Probing ⇄
//! StateTransition) → TornDown`. Provisioning and configuration failures
//! abort the run; a failing probe does not. Teardown runs on every exit path.

mod file;
mod report;

pub use file::{DocumentKind, ScenarioFile};
pub use report::{Abort, GroupReport, ScenarioReport, ScenarioState};

use crate::controller::ControllerClient;
use crate::live::LiveNetwork;
use crate::probe::{ProbeRunner, ToolConfig};
use crate::provision::Provisioner;
use mudnet_core::{
    AddressPlan, ControllerEndpoint, Error, MacAddr, NetworkBackend, ProbeSpec, Result, Topology,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Tunable waits. Settling has no completion signal from the controller, so
/// these are best guesses rather than guarantees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioTiming {
    /// Wait after uploading configuration.
    pub settle_secs: u64,
    /// Wait after a quarantine transition.
    pub transition_settle_secs: u64,
    /// Bound on a switch establishing its control connection.
    pub connect_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Deadline for a MUD report to appear.
    pub report_timeout_secs: u64,
}

impl Default for ScenarioTiming {
    fn default() -> Self {
        Self {
            settle_secs: 10,
            transition_settle_secs: 10,
            connect_timeout_secs: 30,
            poll_interval_ms: 1000,
            report_timeout_secs: 120,
        }
    }
}

impl ScenarioTiming {
    /// No waiting at all; for tests.
    pub fn immediate() -> Self {
        Self {
            settle_secs: 0,
            transition_settle_secs: 0,
            connect_timeout_secs: 1,
            poll_interval_ms: 10,
            report_timeout_secs: 1,
        }
    }
}

/// A configuration document uploaded before probing.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    pub resource: String,
    pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionAction {
    Quarantine,
    Unquarantine,
}

/// A quarantine state change, addressed by MAC or by host name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transition {
    pub action: TransitionAction,
    #[serde(default)]
    pub mac: Option<MacAddr>,
    #[serde(default)]
    pub host: Option<String>,
}

impl Transition {
    pub fn quarantine(mac: MacAddr) -> Self {
        Self {
            action: TransitionAction::Quarantine,
            mac: Some(mac),
            host: None,
        }
    }

    pub fn unquarantine(mac: MacAddr) -> Self {
        Self {
            action: TransitionAction::Unquarantine,
            mac: Some(mac),
            host: None,
        }
    }

    fn target(&self, live: &LiveNetwork) -> Result<MacAddr> {
        match (&self.mac, &self.host) {
            (Some(mac), _) => Ok(*mac),
            (None, Some(host)) => live
                .host_config(host)
                .map(|h| h.mac)
                .ok_or_else(|| Error::UnknownEndpoint(host.clone())),
            (None, None) => Err(Error::InvalidConfig(
                "transition needs a mac or a host".to_string(),
            )),
        }
    }
}

/// Probes run together, optionally after quarantine transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeGroup {
    pub name: String,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    /// Wait for the controller to report a MUD profile before probing.
    #[serde(default)]
    pub await_mud_report: bool,
    pub probes: Vec<ProbeSpec>,
}

/// Everything needed to run one scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub topology: Topology,
    pub plan: AddressPlan,
    pub documents: Vec<ConfigDocument>,
    pub groups: Vec<ProbeGroup>,
    pub timing: ScenarioTiming,
    pub tools: ToolConfig,
}

impl Scenario {
    /// Points controllers declared without endpoints at `host` on the
    /// standard OpenFlow port.
    pub fn default_controller_host(&mut self, host: IpAddr) {
        for name in self.topology.controller_names() {
            let endpoints = self.plan.controllers.entry(name.to_string()).or_default();
            if endpoints.is_empty() {
                endpoints.push(ControllerEndpoint::new(SocketAddr::new(
                    host,
                    ControllerEndpoint::DEFAULT_OPENFLOW_PORT,
                )));
            }
        }
    }

    /// Checks cross references that the topology alone cannot.
    pub fn validate(&self) -> Result<()> {
        self.plan.resolve(&self.topology)?;
        for group in &self.groups {
            for probe in &group.probes {
                if self.topology.host(&probe.source).is_none() {
                    return Err(Error::InvalidConfig(format!(
                        "group '{}': probe source '{}' is not a host",
                        group.name, probe.source
                    )));
                }
            }
            for transition in &group.transitions {
                if let Some(host) = &transition.host
                    && self.topology.host(host).is_none()
                {
                    return Err(Error::InvalidConfig(format!(
                        "group '{}': transition host '{host}' is not a host",
                        group.name
                    )));
                }
                if transition.host.is_none() && transition.mac.is_none() {
                    return Err(Error::InvalidConfig(format!(
                        "group '{}': transition needs a mac or a host",
                        group.name
                    )));
                }
            }
        }
        Ok(())
    }
}

pub struct Orchestrator {
    backend: Arc<dyn NetworkBackend>,
    controller: Arc<ControllerClient>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn NetworkBackend>, controller: Arc<ControllerClient>) -> Self {
        Self {
            backend,
            controller,
        }
    }

    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        self.run_until(scenario, CancellationToken::new()).await
    }

    /// Runs the scenario; cancelling `shutdown` aborts the current step and
    /// still tears the network down.
    pub async fn run_until(
        &self,
        scenario: &Scenario,
        shutdown: CancellationToken,
    ) -> ScenarioReport {
        let mut report = ScenarioReport::new(&scenario.name);
        info!(scenario = %scenario.name, "starting scenario");

        let provisioned = Provisioner::new(self.backend.clone())
            .connect_timeout(Duration::from_secs(scenario.timing.connect_timeout_secs))
            .shutdown_on(shutdown.clone())
            .provision(&scenario.topology, &scenario.plan)
            .await;
        let live = match provisioned {
            Ok(live) => live,
            Err(e) => {
                warn!(error = %e, "provisioning failed, scenario aborted");
                report.abort(e);
                report.enter(ScenarioState::TornDown);
                return report;
            }
        };
        report.enter(ScenarioState::Provisioned);

        let driven = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(Error::Cancelled),
            result = self.drive(&live, scenario, &mut report) => result,
        };
        if let Err(e) = driven {
            warn!(error = %e, state = ?report.state(), "scenario aborted");
            report.abort(e);
        }

        let teardown = live.teardown().await;
        report.teardown_errors = teardown.errors;
        report.enter(ScenarioState::TornDown);

        info!(
            scenario = %scenario.name,
            passed = report.passed(),
            failed_probes = report.failed_probes(),
            "scenario finished"
        );
        report
    }

    async fn drive(
        &self,
        live: &LiveNetwork,
        scenario: &Scenario,
        report: &mut ScenarioReport,
    ) -> Result<()> {
        let timing = &scenario.timing;
        let runner = ProbeRunner::new(scenario.tools.clone());

        self.controller.clear_rules().await?;
        for doc in &scenario.documents {
            self.controller
                .upload_configuration(&doc.resource, &doc.body)
                .await?;
        }
        settle(Duration::from_secs(timing.settle_secs)).await;
        report.enter(ScenarioState::Configured);

        for group in &scenario.groups {
            if !group.transitions.is_empty() {
                report.enter(ScenarioState::StateTransition);
                for transition in &group.transitions {
                    let mac = transition.target(live)?;
                    match transition.action {
                        TransitionAction::Quarantine => self.controller.quarantine(mac).await?,
                        TransitionAction::Unquarantine => {
                            self.controller.unquarantine(mac).await?
                        }
                    }
                }
                settle(Duration::from_secs(timing.transition_settle_secs)).await;
            }

            if group.await_mud_report {
                let deadline = tokio::time::Instant::now()
                    + Duration::from_secs(timing.report_timeout_secs);
                self.controller
                    .poll_mud_report(
                        &[],
                        Duration::from_millis(timing.poll_interval_ms),
                        deadline,
                    )
                    .await?;
            }

            report.enter(ScenarioState::Probing);
            info!(group = %group.name, probes = group.probes.len(), "running probe group");
            let results = runner.run_probe_sequence(live, &group.probes).await;
            report.groups.push(GroupReport {
                name: group.name.clone(),
                results,
            });
        }
        Ok(())
    }
}

async fn settle(duration: Duration) {
    if !duration.is_zero() {
        info!(?duration, "waiting for policy to settle");
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudnet_core::{Dpid, ExpectedOutcome, HostPlan, ProbeKind};
    use std::net::Ipv4Addr;

    fn scenario() -> Scenario {
        let mut topology = Topology::new();
        topology.add_host("h1").unwrap();
        topology.add_host("h2").unwrap();
        topology.add_switch("s1", Some(Dpid::new(1))).unwrap();
        topology.link("s1", "h1").unwrap();
        topology.link("s1", "h2").unwrap();
        topology.bind_controller("s1", "c1").unwrap();
        let gw = HostPlan {
            default_route: Some(Ipv4Addr::new(10, 0, 0, 2)),
            ..Default::default()
        };
        Scenario {
            name: "unit".into(),
            topology,
            plan: AddressPlan::new().host("h1", gw.clone()).host("h2", gw),
            documents: Vec::new(),
            groups: vec![ProbeGroup {
                name: "g".into(),
                transitions: vec![Transition {
                    action: TransitionAction::Quarantine,
                    mac: None,
                    host: Some("h1".into()),
                }],
                await_mud_report: false,
                probes: vec![ProbeSpec::new(
                    "h1",
                    ProbeKind::Icmp {
                        target: "10.0.0.2".into(),
                        count: 1,
                    },
                    ExpectedOutcome::Failure,
                )],
            }],
            timing: ScenarioTiming::immediate(),
            tools: ToolConfig::default(),
        }
    }

    #[test]
    fn default_controller_host_fills_missing_endpoints() {
        let mut scenario = scenario();
        scenario.default_controller_host(IpAddr::V4(Ipv4Addr::new(10, 0, 4, 3)));
        assert_eq!(
            scenario.plan.controllers["c1"][0].ovs_target(),
            "tcp:10.0.4.3:6653"
        );
        scenario.validate().unwrap();
    }

    #[test]
    fn explicit_endpoints_are_kept() {
        let mut scenario = scenario();
        scenario.plan = scenario
            .plan
            .controller("c1", "127.0.0.1:6673".parse().unwrap());
        scenario.default_controller_host(IpAddr::V4(Ipv4Addr::new(10, 0, 4, 3)));
        assert_eq!(scenario.plan.controllers["c1"].len(), 1);
        assert_eq!(scenario.plan.controllers["c1"][0].addr().port(), 6673);
    }

    #[test]
    fn probe_from_unknown_host_is_rejected() {
        let mut scenario = scenario();
        scenario.default_controller_host(IpAddr::V4(Ipv4Addr::LOCALHOST));
        scenario.groups[0].probes[0].source = "h7".into();
        assert!(matches!(scenario.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn transition_without_target_is_rejected() {
        let mut scenario = scenario();
        scenario.default_controller_host(IpAddr::V4(Ipv4Addr::LOCALHOST));
        scenario.groups[0].transitions[0].host = None;
        assert!(matches!(scenario.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn timing_defaults() {
        let timing: ScenarioTiming = toml::from_str("settle_secs = 3").unwrap();
        assert_eq!(timing.settle_secs, 3);
        assert_eq!(timing.connect_timeout_secs, 30);
    }
}
