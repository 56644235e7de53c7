//! ICMP echo via `ping -q`. The metric is the packet loss percentage.

use mudnet_core::{CommandOutput, ProbeOutcome, Result};
use std::time::Duration;

pub(crate) fn command(tool: &[String], target: &str, count: u32, timeout: Duration) -> Vec<String> {
    let mut argv = tool.to_vec();
    argv.extend([
        "-c".to_string(),
        count.max(1).to_string(),
        "-w".to_string(),
        timeout.as_secs().max(1).to_string(),
        "-q".to_string(),
        target.to_string(),
    ]);
    argv
}

fn packet_loss(text: &str) -> Option<f64> {
    for line in text.lines() {
        if let Some(pos) = line.find("% packet loss") {
            let start = line[..pos]
                .rfind(|c: char| c == ' ' || c == ',')
                .map_or(0, |i| i + 1);
            return line[start..pos].parse().ok();
        }
    }
    None
}

/// Total loss is a timeout. With no statistics line, only an unreachable
/// network is a network-level answer.
pub(crate) fn parse(output: &CommandOutput) -> Result<ProbeOutcome> {
    let text = output.combined();
    match packet_loss(&text) {
        Some(loss) if loss >= 100.0 => Ok(ProbeOutcome::timed_out().with_metric(loss)),
        Some(loss) => Ok(ProbeOutcome::completed().with_metric(loss)),
        None if text.contains("Network is unreachable") => {
            Ok(ProbeOutcome::error().with_metric(100.0))
        }
        None => Err(super::unrecognized(output)),
    }
}
