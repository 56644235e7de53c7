use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 20;

/// A single reachability check run from a source host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    /// Host the probe client runs on.
    pub source: String,
    #[serde(flatten)]
    pub kind: ProbeKind,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub expect: ExpectedOutcome,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

impl ProbeSpec {
    pub fn new(source: &str, kind: ProbeKind, expect: ExpectedOutcome) -> Self {
        Self {
            source: source.to_string(),
            kind,
            timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            expect,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl fmt::Display for ProbeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.kind)
    }
}

/// Protocol-specific probe parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum ProbeKind {
    /// Fetch a URL; completes when the whole body is downloaded.
    Http {
        url: String,
        #[serde(default = "default_tries")]
        tries: u32,
    },
    /// Open a TCP connection and exchange a greeting with an echo server.
    Tcp { target: String, port: u16 },
    /// UDP echo round trips; the metric is the number of replies.
    Udp {
        target: String,
        port: u16,
        #[serde(default = "default_udp_count")]
        count: u32,
    },
    /// ICMP echo; the metric is the packet loss percentage.
    Icmp {
        target: String,
        #[serde(default = "default_ping_count")]
        count: u32,
    },
}

fn default_tries() -> u32 {
    1
}

fn default_udp_count() -> u32 {
    5
}

fn default_ping_count() -> u32 {
    10
}

impl ProbeKind {
    pub fn protocol(&self) -> &'static str {
        match self {
            ProbeKind::Http { .. } => "http",
            ProbeKind::Tcp { .. } => "tcp",
            ProbeKind::Udp { .. } => "udp",
            ProbeKind::Icmp { .. } => "icmp",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Http { url, .. } => write!(f, "{url}"),
            ProbeKind::Tcp { target, port } => write!(f, "tcp://{target}:{port}"),
            ProbeKind::Udp { target, port, .. } => write!(f, "udp://{target}:{port}"),
            ProbeKind::Icmp { target, .. } => write!(f, "icmp://{target}"),
        }
    }
}

/// What a probe is expected to observe under the current policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedOutcome {
    Success,
    Failure,
    /// The probe's metric must fall within the inclusive bounds.
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
}

impl ExpectedOutcome {
    pub fn at_least(min: f64) -> Self {
        ExpectedOutcome::Range {
            min: Some(min),
            max: None,
        }
    }

    pub fn at_most(max: f64) -> Self {
        ExpectedOutcome::Range {
            min: None,
            max: Some(max),
        }
    }

    pub fn matches(&self, outcome: &ProbeOutcome) -> bool {
        match self {
            ExpectedOutcome::Success => outcome.status == ProbeStatus::Completed,
            ExpectedOutcome::Failure => matches!(
                outcome.status,
                ProbeStatus::TimedOut | ProbeStatus::Error
            ),
            ExpectedOutcome::Range { min, max } => match outcome.metric {
                Some(value) => {
                    min.is_none_or(|min| value >= min) && max.is_none_or(|max| value <= max)
                }
                None => false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    /// The exchange finished successfully.
    Completed,
    TimedOut,
    /// The client ran and reported a network-level error such as a refused
    /// connection or an unreachable destination. Output a client produces
    /// when it could not run at all never maps here.
    Error,
}

/// Typed result of parsing a probe client's output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status: ProbeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,
}

impl ProbeOutcome {
    pub fn completed() -> Self {
        Self {
            status: ProbeStatus::Completed,
            metric: None,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            status: ProbeStatus::TimedOut,
            metric: None,
        }
    }

    pub fn error() -> Self {
        Self {
            status: ProbeStatus::Error,
            metric: None,
        }
    }

    pub fn with_metric(mut self, metric: f64) -> Self {
        self.metric = Some(metric);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    Observed(ProbeOutcome),
    /// The probe could not be started on its source host.
    SetupFailed { reason: String },
    /// Abandoned because the network was torn down.
    Cancelled,
}

/// Outcome of one probe invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub spec: ProbeSpec,
    pub output: String,
    pub observation: Observation,
    pub passed: bool,
}

impl ProbeResult {
    pub fn observed(spec: ProbeSpec, output: String, outcome: ProbeOutcome) -> Self {
        let passed = spec.expect.matches(&outcome);
        Self {
            spec,
            output,
            observation: Observation::Observed(outcome),
            passed,
        }
    }

    pub fn setup_failed(spec: ProbeSpec, reason: impl Into<String>) -> Self {
        Self {
            spec,
            output: String::new(),
            observation: Observation::SetupFailed {
                reason: reason.into(),
            },
            passed: false,
        }
    }

    pub fn cancelled(spec: ProbeSpec) -> Self {
        Self {
            spec,
            output: String::new(),
            observation: Observation::Cancelled,
            passed: false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.observation, Observation::Cancelled)
    }
}
