//! HTTP fetch via `wget`.

use mudnet_core::{CommandOutput, ProbeOutcome, Result};
use std::time::Duration;

pub(crate) fn command(tool: &[String], url: &str, tries: u32, timeout: Duration) -> Vec<String> {
    let mut argv = tool.to_vec();
    argv.extend([
        url.to_string(),
        "--no-cache".to_string(),
        "--no-dns-cache".to_string(),
        "--timeout".to_string(),
        timeout.as_secs().to_string(),
        "--tries".to_string(),
        tries.max(1).to_string(),
        "-O".to_string(),
        "/dev/null".to_string(),
    ]);
    argv
}

/// wget's own messages for a request the network did not carry through.
const NETWORK_ERRORS: &[&str] = &[
    "Connection refused",
    "No route to host",
    "Network is unreachable",
    "unable to resolve host address",
    "Connection reset",
];

/// A download counts as complete when wget exits cleanly or reports the
/// whole body saved. Exit 4 is wget's network failure, 8 an error response.
pub(crate) fn parse(output: &CommandOutput) -> Result<ProbeOutcome> {
    let text = output.combined();
    if output.success() || (text.contains("100%") && text.contains("saved")) {
        return Ok(ProbeOutcome::completed());
    }
    if text.contains("timed out") || text.contains("Read error") {
        return Ok(ProbeOutcome::timed_out());
    }
    if matches!(output.status, Some(4 | 8)) || NETWORK_ERRORS.iter().any(|m| text.contains(m)) {
        return Ok(ProbeOutcome::error());
    }
    Err(super::unrecognized(output))
}
