//! Probe Runner: executes reachability probes on source hosts and classifies
//! their output.
//!
//! Each protocol has its own adapter that builds the client invocation and
//! parses its output into a typed [`ProbeOutcome`].

mod http;
mod icmp;
mod tcp;
mod udp;

use crate::live::LiveNetwork;
use futures::future::join_all;
use mudnet_core::{
    CommandOutput, Error, ProbeKind, ProbeOutcome, ProbeResult, ProbeSpec, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Extra time granted past a probe's own timeout before the runner gives up
/// on the client process.
const EXEC_GRACE: Duration = Duration::from_secs(5);

/// Argv prefixes of the traffic-generator clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub wget: Vec<String>,
    pub ping: Vec<String>,
    pub tcp_client: Vec<String>,
    pub udp_client: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            wget: vec!["wget".to_string()],
            ping: vec!["ping".to_string()],
            tcp_client: vec!["tcp-client".to_string()],
            udp_client: vec!["udpping".to_string()],
        }
    }
}

/// Builds the client command line for a probe.
pub fn command_for(tools: &ToolConfig, spec: &ProbeSpec) -> Vec<String> {
    let timeout = spec.timeout();
    match &spec.kind {
        ProbeKind::Http { url, tries } => http::command(&tools.wget, url, *tries, timeout),
        ProbeKind::Tcp { target, port } => tcp::command(&tools.tcp_client, target, *port),
        ProbeKind::Udp {
            target,
            port,
            count,
        } => udp::command(&tools.udp_client, target, *port, *count),
        ProbeKind::Icmp { target, count } => icmp::command(&tools.ping, target, *count, timeout),
    }
}

/// Classifies a client's output.
///
/// Output that shows the client never ran, or that no adapter recognises, is
/// an [`Error::ProbeSetup`] rather than a network-level outcome.
pub fn parse_output(kind: &ProbeKind, output: &CommandOutput) -> Result<ProbeOutcome> {
    ensure_started(output)?;
    match kind {
        ProbeKind::Http { .. } => http::parse(output),
        ProbeKind::Tcp { .. } => tcp::parse(output),
        ProbeKind::Udp { .. } => udp::parse(output),
        ProbeKind::Icmp { .. } => icmp::parse(output),
    }
}

/// Fails when the exit status or output says the client binary was never
/// started: 126/127 from a shell, 255 from `ip netns exec`.
fn ensure_started(output: &CommandOutput) -> Result<()> {
    let text = output.combined();
    let not_started = match output.status {
        Some(126 | 127) => true,
        Some(255) => text.contains("exec of"),
        _ => false,
    } || text.contains("command not found");
    if not_started {
        return Err(Error::ProbeSetup(format!(
            "client did not run: {}",
            first_line(&text)
        )));
    }
    Ok(())
}

fn unrecognized(output: &CommandOutput) -> Error {
    Error::ProbeSetup(format!(
        "unrecognized client output (status {:?}): {}",
        output.status,
        first_line(&output.combined())
    ))
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("<no output>")
}

#[derive(Debug, Clone, Default)]
pub struct ProbeRunner {
    tools: ToolConfig,
}

impl ProbeRunner {
    pub fn new(tools: ToolConfig) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &ToolConfig {
        &self.tools
    }

    /// Runs one probe. Never fails: setup problems and cancellation are part
    /// of the returned result.
    pub async fn run_probe(&self, live: &LiveNetwork, spec: &ProbeSpec) -> ProbeResult {
        let token = live.cancellation_token();
        if token.is_cancelled() {
            return ProbeResult::cancelled(spec.clone());
        }
        if live.topology().host(&spec.source).is_none() {
            return ProbeResult::setup_failed(
                spec.clone(),
                format!("unknown source host {}", spec.source),
            );
        }

        let argv = command_for(&self.tools, spec);
        debug!(probe = %spec, ?argv, "running probe");
        let limit = spec.timeout() + EXEC_GRACE;

        let result = tokio::select! {
            _ = token.cancelled() => return ProbeResult::cancelled(spec.clone()),
            result = tokio::time::timeout(limit, live.exec(&spec.source, &argv)) => result,
        };

        let result = match result {
            Err(_) => ProbeResult::observed(
                spec.clone(),
                format!("probe client did not exit within {limit:?}"),
                ProbeOutcome::timed_out(),
            ),
            Ok(Err(Error::Cancelled)) => ProbeResult::cancelled(spec.clone()),
            Ok(Err(e)) => ProbeResult::setup_failed(spec.clone(), e.to_string()),
            Ok(Ok(output)) => match parse_output(&spec.kind, &output) {
                Ok(outcome) => ProbeResult::observed(spec.clone(), output.combined(), outcome),
                Err(e) => ProbeResult {
                    output: output.combined(),
                    ..ProbeResult::setup_failed(spec.clone(), e.to_string())
                },
            },
        };
        info!(
            probe = %spec,
            expected = ?spec.expect,
            passed = result.passed,
            "probe finished"
        );
        result
    }

    /// Runs probes in declared order per source host. Different source hosts
    /// run concurrently. Results come back in declared order.
    pub async fn run_probe_sequence(
        &self,
        live: &LiveNetwork,
        specs: &[ProbeSpec],
    ) -> Vec<ProbeResult> {
        let mut by_source: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (index, spec) in specs.iter().enumerate() {
            by_source.entry(&spec.source).or_default().push(index);
        }

        let lanes = by_source.into_values().map(|indices| async move {
            let mut results = Vec::with_capacity(indices.len());
            for index in indices {
                results.push((index, self.run_probe(live, &specs[index]).await));
            }
            results
        });

        let mut slots: Vec<Option<ProbeResult>> = vec![None; specs.len()];
        for (index, result) in join_all(lanes).await.into_iter().flatten() {
            slots[index] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::Provisioner;
    use crate::test_utils::FakeBackend;
    use mudnet_core::{
        AddressPlan, ExpectedOutcome, HostPlan, Observation, ProbeStatus, Topology,
    };
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    async fn network(backend: Arc<FakeBackend>) -> LiveNetwork {
        let mut topo = Topology::new();
        for h in ["h1", "h2", "h3"] {
            topo.add_host(h).unwrap();
        }
        topo.add_switch("s1", None).unwrap();
        for h in ["h1", "h2", "h3"] {
            topo.link("s1", h).unwrap();
        }
        topo.bind_controller("s1", "c1").unwrap();
        let gw = HostPlan {
            default_route: Some(Ipv4Addr::new(10, 0, 0, 254)),
            ..Default::default()
        };
        let plan = AddressPlan::new()
            .host("h1", gw.clone())
            .host("h2", gw.clone())
            .host("h3", gw)
            .controller("c1", "127.0.0.1:6653".parse().unwrap());
        Provisioner::new(backend)
            .provision(&topo, &plan)
            .await
            .unwrap()
    }

    fn tcp(source: &str, port: u16, expect: ExpectedOutcome) -> ProbeSpec {
        ProbeSpec::new(
            source,
            ProbeKind::Tcp {
                target: "10.0.0.3".into(),
                port,
            },
            expect,
        )
    }

    fn tcp_responder(host: &str, argv: &[String]) -> CommandOutput {
        if argv.first().map(String::as_str) != Some("tcp-client") {
            return CommandOutput::ok("");
        }
        // h1 may reach port 8010 only.
        if host == "h1" && argv.last().map(String::as_str) == Some("8010") {
            CommandOutput::ok("OK")
        } else {
            CommandOutput::failed(1, "timed out")
        }
    }

    #[tokio::test]
    async fn classifies_against_expectation() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_responder(tcp_responder);
        let live = network(backend).await;
        let runner = ProbeRunner::default();

        let ok = runner
            .run_probe(&live, &tcp("h1", 8010, ExpectedOutcome::Success))
            .await;
        assert!(ok.passed);
        assert_eq!(ok.output, "OK");

        let blocked = runner
            .run_probe(&live, &tcp("h2", 8010, ExpectedOutcome::Failure))
            .await;
        assert!(blocked.passed);
        assert!(matches!(
            blocked.observation,
            Observation::Observed(ProbeOutcome {
                status: ProbeStatus::TimedOut,
                ..
            })
        ));

        live.teardown().await;
    }

    #[tokio::test]
    async fn repeated_probe_gives_same_verdict() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_responder(tcp_responder);
        let live = network(backend).await;
        let runner = ProbeRunner::default();
        let spec = tcp("h1", 8010, ExpectedOutcome::Success);

        let first = runner.run_probe(&live, &spec).await;
        let second = runner.run_probe(&live, &spec).await;
        assert_eq!(first.passed, second.passed);
        assert_eq!(first.observation, second.observation);

        live.teardown().await;
    }

    #[tokio::test]
    async fn unknown_source_is_setup_failure() {
        let live = network(Arc::new(FakeBackend::new())).await;
        let result = ProbeRunner::default()
            .run_probe(&live, &tcp("h9", 80, ExpectedOutcome::Failure))
            .await;
        assert!(!result.passed);
        assert!(matches!(result.observation, Observation::SetupFailed { .. }));
        live.teardown().await;
    }

    #[tokio::test]
    async fn sequence_preserves_declared_order() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_responder(tcp_responder);
        let live = network(backend.clone()).await;

        let specs = vec![
            tcp("h2", 1, ExpectedOutcome::Failure),
            tcp("h1", 8010, ExpectedOutcome::Success),
            tcp("h2", 2, ExpectedOutcome::Failure),
            tcp("h1", 3, ExpectedOutcome::Failure),
        ];
        let results = ProbeRunner::default()
            .run_probe_sequence(&live, &specs)
            .await;

        let declared: Vec<_> = results.iter().map(|r| r.spec.clone()).collect();
        assert_eq!(declared, specs);
        assert!(results.iter().all(|r| r.passed));

        let h2_ports: Vec<String> = backend
            .commands_for("h2")
            .into_iter()
            .filter(|argv| argv[0] == "tcp-client")
            .map(|argv| argv[4].clone())
            .collect();
        assert_eq!(h2_ports, vec!["1", "2"]);

        live.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hung_client_is_timed_out() {
        let backend = Arc::new(FakeBackend::new());
        let live = network(backend.clone()).await;
        backend.set_exec_delay(Duration::from_secs(3600));

        let spec = tcp("h1", 8010, ExpectedOutcome::Failure).with_timeout(Duration::from_secs(2));
        let result = ProbeRunner::default().run_probe(&live, &spec).await;
        assert!(result.passed);
        assert!(matches!(
            result.observation,
            Observation::Observed(ProbeOutcome {
                status: ProbeStatus::TimedOut,
                ..
            })
        ));
        live.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_cancels_in_flight_probes() {
        let backend = Arc::new(FakeBackend::new());
        let live = Arc::new(network(backend.clone()).await);
        backend.set_exec_delay(Duration::from_secs(10));

        let probing = {
            let live = live.clone();
            tokio::spawn(async move {
                ProbeRunner::default()
                    .run_probe(&live, &tcp("h1", 8010, ExpectedOutcome::Success))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        live.teardown().await;

        let result = probing.await.unwrap();
        assert!(result.is_cancelled());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn missing_client_is_setup_failure_not_blocked_traffic() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_responder(|_: &str, argv: &[String]| match argv[0].as_str() {
            "ip" | "sysctl" | "iptables" => CommandOutput::ok(""),
            tool => CommandOutput::failed(
                255,
                format!("exec of \"{tool}\" failed: No such file or directory"),
            ),
        });
        let live = network(backend).await;
        let runner = ProbeRunner::default();

        let specs = [
            ProbeKind::Http {
                url: "http://203.0.113.14".into(),
                tries: 1,
            },
            ProbeKind::Tcp {
                target: "10.0.0.3".into(),
                port: 8010,
            },
            ProbeKind::Udp {
                target: "10.0.0.3".into(),
                port: 8008,
                count: 5,
            },
            ProbeKind::Icmp {
                target: "10.0.0.3".into(),
                count: 1,
            },
        ]
        .map(|kind| ProbeSpec::new("h1", kind, ExpectedOutcome::Failure));

        for spec in &specs {
            let result = runner.run_probe(&live, spec).await;
            assert!(!result.passed, "{spec} passed without running its client");
            match &result.observation {
                Observation::SetupFailed { reason } => {
                    assert!(reason.contains("client did not run"), "{reason}")
                }
                other => panic!("{spec}: expected setup failure, got {other:?}"),
            }
            assert!(result.output.contains("exec of"));
        }

        live.teardown().await;
    }

    #[test]
    fn unrecognized_output_is_setup_error() {
        let traceback = CommandOutput::failed(
            1,
            "Traceback (most recent call last):\nModuleNotFoundError: No module named 'x'",
        );
        let kinds = [
            ProbeKind::Http {
                url: "http://203.0.113.14".into(),
                tries: 1,
            },
            ProbeKind::Tcp {
                target: "10.0.0.3".into(),
                port: 8010,
            },
            ProbeKind::Udp {
                target: "10.0.0.3".into(),
                port: 8008,
                count: 5,
            },
            ProbeKind::Icmp {
                target: "10.0.0.3".into(),
                count: 1,
            },
        ];
        for kind in &kinds {
            assert!(
                matches!(parse_output(kind, &traceback), Err(Error::ProbeSetup(_))),
                "{kind}"
            );
        }
        let not_found = CommandOutput::failed(127, "sh: 1: wget: not found");
        assert!(matches!(
            parse_output(&kinds[0], &not_found),
            Err(Error::ProbeSetup(_))
        ));
    }

    #[test]
    fn tools_are_configurable() {
        let tools = ToolConfig {
            tcp_client: vec!["python".into(), "../util/tcp-client.py".into()],
            ..Default::default()
        };
        let argv = command_for(&tools, &tcp("h1", 8010, ExpectedOutcome::Success));
        assert_eq!(argv[..2], ["python", "../util/tcp-client.py"]);
    }
}
