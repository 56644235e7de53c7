use mudnet_core::{Observation, ProbeResult, ProbeStatus, Result};
use serde::Serialize;
use std::fmt::Write as _;

/// Orchestrator states, in the order a successful run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Init,
    Provisioned,
    Configured,
    Probing,
    StateTransition,
    TornDown,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub name: String,
    pub results: Vec<ProbeResult>,
}

impl GroupReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

/// A fatal error that stopped the scenario before all groups ran.
#[derive(Debug, Clone, Serialize)]
pub struct Abort {
    /// The last state reached before the failure.
    pub state: ScenarioState,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub states: Vec<ScenarioState>,
    pub groups: Vec<GroupReport>,
    pub aborted: Option<Abort>,
    pub teardown_errors: Vec<String>,
}

impl ScenarioReport {
    pub fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            states: vec![ScenarioState::Init],
            groups: Vec::new(),
            aborted: None,
            teardown_errors: Vec::new(),
        }
    }

    pub(crate) fn enter(&mut self, state: ScenarioState) {
        self.states.push(state);
    }

    pub fn state(&self) -> ScenarioState {
        self.states
            .last()
            .copied()
            .unwrap_or(ScenarioState::Init)
    }

    pub(crate) fn abort(&mut self, error: impl ToString) {
        self.aborted = Some(Abort {
            state: self.state(),
            error: error.to_string(),
        });
    }

    pub fn results(&self) -> impl Iterator<Item = &ProbeResult> {
        self.groups.iter().flat_map(|g| g.results.iter())
    }

    /// Every probe passed and no step aborted.
    pub fn passed(&self) -> bool {
        self.aborted.is_none() && self.results().all(|r| r.passed)
    }

    /// Probes whose verdict went against their expectation. Probes cut off
    /// by teardown are not counted.
    pub fn failed_probes(&self) -> usize {
        self.results()
            .filter(|r| !r.passed && !r.is_cancelled())
            .count()
    }

    pub fn cancelled_probes(&self) -> usize {
        self.results().filter(|r| r.is_cancelled()).count()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| mudnet_core::Error::InvalidConfig(format!("report serialization: {e}")))
    }

    /// Human-readable summary with captured output for failed probes.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "scenario: {}", self.scenario);
        for group in &self.groups {
            let _ = writeln!(out, "\n[{}]", group.name);
            for result in &group.results {
                let verdict = if result.is_cancelled() {
                    "CANCELLED"
                } else if result.passed {
                    "PASS"
                } else {
                    "FAIL"
                };
                let _ = writeln!(
                    out,
                    "  {verdict:<9} {} (expected {:?}, observed {})",
                    result.spec,
                    result.spec.expect,
                    describe(&result.observation)
                );
                if !result.passed && !result.output.trim().is_empty() {
                    for line in result.output.trim().lines() {
                        let _ = writeln!(out, "            | {line}");
                    }
                }
            }
        }

        if let Some(abort) = &self.aborted {
            let _ = writeln!(out, "\nABORTED in {:?}: {}", abort.state, abort.error);
        }
        for err in &self.teardown_errors {
            let _ = writeln!(out, "teardown: {err}");
        }

        let total = self.results().count();
        let _ = write!(
            out,
            "\n{}: {} of {} probes passed",
            if self.passed() { "PASSED" } else { "FAILED" },
            self.results().filter(|r| r.passed).count(),
            total
        );
        match self.cancelled_probes() {
            0 => out.push('\n'),
            n => {
                let _ = writeln!(out, " ({n} cancelled)");
            }
        }
        out
    }
}

fn describe(observation: &Observation) -> String {
    match observation {
        Observation::Observed(outcome) => {
            let status = match outcome.status {
                ProbeStatus::Completed => "completed",
                ProbeStatus::TimedOut => "timed out",
                ProbeStatus::Error => "error",
            };
            match outcome.metric {
                Some(metric) => format!("{status}, metric {metric}"),
                None => status.to_string(),
            }
        }
        Observation::SetupFailed { reason } => format!("setup failed: {reason}"),
        Observation::Cancelled => "cancelled".to_string(),
    }
}
