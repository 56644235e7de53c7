//! End-to-end orchestrator runs on the in-memory backend against a
//! RESTCONF double.

mod common;

use common::FakeController;
use mudnet::test_utils::FakeBackend;
use mudnet::{
    CommandOutput, ControllerClient, ControllerConfig, Error, ExpectedOutcome, Observation,
    Orchestrator, Scenario, ScenarioFile, ScenarioState, resources,
};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const QUARANTINE_SCENARIO: &str = r#"
name = "quarantine"
links = [["s1", "h1"], ["s1", "h2"]]

[timing]
settle_secs = 0
transition_settle_secs = 0
connect_timeout_secs = 1
poll_interval_ms = 10
report_timeout_secs = 5

[[hosts]]
name = "h1"
mac = "00:00:00:00:00:b1"
default_route = "10.0.0.254"

[[hosts]]
name = "h2"
default_route = "10.0.0.254"

[[switches]]
name = "s1"
dpid = 1
controllers = ["c1"]

[[controllers]]
name = "c1"

[[documents]]
kind = "device-association"
path = "device-association.json"

[[groups]]
name = "baseline"
await_mud_report = true
[[groups.probes]]
source = "h1"
protocol = "tcp"
target = "10.0.0.2"
port = 8010
expect = "success"

[[groups]]
name = "quarantined"
[[groups.transitions]]
action = "quarantine"
host = "h1"
[[groups.probes]]
source = "h1"
protocol = "tcp"
target = "10.0.0.2"
port = 8010
expect = "failure"
[[groups.probes]]
source = "h2"
protocol = "tcp"
target = "10.0.0.1"
port = 8010
expect = "success"

[[groups]]
name = "released"
[[groups.transitions]]
action = "unquarantine"
mac = "00:00:00:00:00:b1"
[[groups.probes]]
source = "h1"
protocol = "tcp"
target = "10.0.0.2"
port = 8010
expect = "success"
"#;

fn load_scenario() -> (tempfile::TempDir, Scenario) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("scenario.toml"), QUARANTINE_SCENARIO).unwrap();
    std::fs::write(
        dir.path().join("device-association.json"),
        r#"{"mapping": {"mud-url": "https://mudfiles.example.com/toaster.json", "device-id": ["00:00:00:00:00:b1"]}}"#,
    )
    .unwrap();

    let mut scenario =
        ScenarioFile::load(&dir.path().join("scenario.toml")).expect("scenario did not load");
    scenario.default_controller_host(IpAddr::V4(Ipv4Addr::LOCALHOST));
    scenario.validate().expect("scenario is invalid");
    (dir, scenario)
}

/// TCP probes succeed unless the source device is quarantined.
fn quarantine_aware_backend(controller: &FakeController) -> Arc<FakeBackend> {
    let backend = Arc::new(FakeBackend::new());
    let controller = controller.clone();
    backend.set_responder(move |host: &str, argv: &[String]| {
        if argv.first().map(String::as_str) != Some("tcp-client") {
            return CommandOutput::ok("");
        }
        let quarantined = controller
            .state()
            .quarantined
            .contains(&"00:00:00:00:00:b1".to_string());
        if host == "h1" && quarantined {
            CommandOutput::failed(1, "connect: timed out")
        } else {
            CommandOutput::ok("OK")
        }
    });
    backend
}

/// A quarantined device loses access and regains it once released.
#[tokio::test]
async fn test_quarantine_scenario_passes() {
    let (_dir, scenario) = load_scenario();
    let controller = FakeController::new();
    let client = Arc::new(controller.client().await);
    let backend = quarantine_aware_backend(&controller);

    let report = Orchestrator::new(backend.clone(), client).run(&scenario).await;

    assert!(report.passed(), "{}", report.render_text());
    assert_eq!(report.groups.len(), 3);
    assert_eq!(report.results().count(), 4);
    assert_eq!(
        report.states,
        vec![
            ScenarioState::Init,
            ScenarioState::Provisioned,
            ScenarioState::Configured,
            ScenarioState::Probing,
            ScenarioState::StateTransition,
            ScenarioState::Probing,
            ScenarioState::StateTransition,
            ScenarioState::Probing,
            ScenarioState::TornDown,
        ]
    );
    assert!(report.teardown_errors.is_empty());
    assert!(backend.is_empty());

    let state = controller.state();
    assert_eq!(state.clears, 1);
    assert!(state.config.contains_key(resources::DEVICE_ASSOCIATION));
    assert!(state.quarantined.is_empty());
}

/// Switches are pointed at the controller host on the OpenFlow port.
#[tokio::test]
async fn test_switches_use_default_controller() {
    let (_dir, scenario) = load_scenario();
    let plan = scenario.plan.resolve(&scenario.topology).unwrap();
    assert_eq!(plan.switches["s1"][0].ovs_target(), "tcp:127.0.0.1:6653");
}

/// A probe verdict that contradicts its expectation fails the report but
/// the remaining groups still run.
#[tokio::test]
async fn test_failed_probe_does_not_abort() {
    let (_dir, scenario) = load_scenario();
    let controller = FakeController::new();
    let client = Arc::new(controller.client().await);
    let backend = Arc::new(FakeBackend::new());
    backend.set_responder(|_: &str, argv: &[String]| {
        if argv.first().map(String::as_str) == Some("tcp-client") {
            CommandOutput::ok("OK")
        } else {
            CommandOutput::ok("")
        }
    });

    let report = Orchestrator::new(backend.clone(), client).run(&scenario).await;

    assert!(!report.passed());
    assert!(report.aborted.is_none());
    assert_eq!(report.groups.len(), 3);
    assert_eq!(report.failed_probes(), 1);
    assert!(!report.groups[1].passed());
    assert!(backend.is_empty());
}

/// A client that cannot run on its host never satisfies an expected
/// failure. The report marks those probes as setup failures.
#[tokio::test]
async fn test_missing_client_does_not_pass_blocked_expectations() {
    let (_dir, scenario) = load_scenario();
    let controller = FakeController::new();
    let client = Arc::new(controller.client().await);
    let backend = Arc::new(FakeBackend::new());
    backend.set_responder(|_: &str, argv: &[String]| {
        if argv.first().map(String::as_str) == Some("tcp-client") {
            CommandOutput::failed(127, "sh: 1: tcp-client: not found")
        } else {
            CommandOutput::ok("")
        }
    });

    let report = Orchestrator::new(backend.clone(), client).run(&scenario).await;

    assert!(!report.passed());
    assert!(report.aborted.is_none());
    assert_eq!(report.failed_probes(), 4);
    let blocked: Vec<_> = report
        .results()
        .filter(|r| r.spec.expect == ExpectedOutcome::Failure)
        .collect();
    assert_eq!(blocked.len(), 1);
    assert!(!blocked[0].passed);
    assert!(matches!(
        blocked[0].observation,
        Observation::SetupFailed { .. }
    ));
    assert!(backend.is_empty());
}

/// An unreachable controller aborts after provisioning and the network is
/// still torn down.
#[tokio::test]
async fn test_unreachable_controller_aborts_with_teardown() {
    let (_dir, scenario) = load_scenario();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = ControllerClient::new(ControllerConfig {
        retries: 0,
        ..ControllerConfig::for_address(&format!("127.0.0.1:{port}"))
    })
    .unwrap();
    let backend = Arc::new(FakeBackend::new());

    let report = Orchestrator::new(backend.clone(), Arc::new(client))
        .run(&scenario)
        .await;

    let abort = report.aborted.as_ref().expect("scenario did not abort");
    assert_eq!(abort.state, ScenarioState::Provisioned);
    assert!(abort.error.contains("controller unreachable"), "{}", abort.error);
    assert!(report.groups.is_empty());
    assert_eq!(report.state(), ScenarioState::TornDown);
    assert!(backend.is_empty());
}

/// A provisioning failure aborts before the controller is touched.
#[tokio::test]
async fn test_provisioning_failure_aborts() {
    let (_dir, scenario) = load_scenario();
    let controller = FakeController::new();
    let client = Arc::new(controller.client().await);
    let backend = Arc::new(FakeBackend::new());
    backend.fail_host_creation("h2");

    let report = Orchestrator::new(backend.clone(), client).run(&scenario).await;

    let abort = report.aborted.as_ref().expect("scenario did not abort");
    assert_eq!(abort.state, ScenarioState::Init);
    assert!(backend.is_empty());
    assert_eq!(controller.state().clears, 0);
}

/// Waiting for a MUD report that never comes times out and aborts.
#[tokio::test]
async fn test_missing_report_times_out() {
    let (_dir, mut scenario) = load_scenario();
    scenario.timing.report_timeout_secs = 1;
    let controller = FakeController::new();
    controller.state().never_report = true;
    let client = Arc::new(controller.client().await);
    let backend = Arc::new(FakeBackend::new());

    let report = Orchestrator::new(backend.clone(), client).run(&scenario).await;

    let abort = report.aborted.as_ref().expect("scenario did not abort");
    assert_eq!(abort.state, ScenarioState::Configured);
    assert!(abort.error.contains("did not propagate"), "{}", abort.error);
    assert!(backend.is_empty());
}

/// Shutdown during a long wait stops the scenario and cleans up.
#[tokio::test]
async fn test_shutdown_tears_down() {
    let (_dir, mut scenario) = load_scenario();
    scenario.timing.report_timeout_secs = 60;
    let controller = FakeController::new();
    controller.state().never_report = true;
    let client = Arc::new(controller.client().await);
    let backend = Arc::new(FakeBackend::new());
    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            shutdown.cancel();
        });
    }
    let report = Orchestrator::new(backend.clone(), client)
        .run_until(&scenario, shutdown)
        .await;

    let abort = report.aborted.as_ref().expect("scenario did not abort");
    assert_eq!(abort.error, Error::Cancelled.to_string());
    assert_eq!(report.state(), ScenarioState::TornDown);
    assert!(backend.is_empty());
}

/// Scenario files that reference hosts they never declare are rejected.
#[test]
fn test_invalid_scenario_is_rejected() {
    let file = ScenarioFile::parse(
        r#"
name = "broken"
links = [["s1", "h1"]]
[[hosts]]
name = "h1"
default_route = "10.0.0.254"
[[switches]]
name = "s1"
controllers = ["c1"]
[[groups]]
name = "g"
[[groups.probes]]
source = "h5"
protocol = "icmp"
target = "10.0.0.1"
expect = "failure"
"#,
    )
    .unwrap();
    let mut scenario = file.into_scenario(Path::new(".")).unwrap();
    scenario.default_controller_host(IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert!(matches!(scenario.validate(), Err(Error::InvalidConfig(_))));
}
