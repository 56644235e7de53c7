//! UDP echo round trips. The client reports how many replies came back as
//! `[rc=N]`.

use mudnet_core::{CommandOutput, ProbeOutcome, Result};

pub(crate) fn command(tool: &[String], target: &str, port: u16, count: u32) -> Vec<String> {
    let mut argv = tool.to_vec();
    argv.extend([
        "--port".to_string(),
        port.to_string(),
        "--host".to_string(),
        target.to_string(),
        "--client".to_string(),
        "--quiet".to_string(),
        "--count".to_string(),
        count.to_string(),
    ]);
    argv
}

fn reply_count(text: &str) -> Option<u32> {
    let start = text.find("[rc=")? + "[rc=".len();
    let rest = &text[start..];
    let end = rest.find(']')?;
    rest[..end].trim().parse().ok()
}

/// Without the `[rc=N]` marker the client never got to count anything.
pub(crate) fn parse(output: &CommandOutput) -> Result<ProbeOutcome> {
    match reply_count(&output.combined()) {
        Some(0) => Ok(ProbeOutcome::timed_out().with_metric(0.0)),
        Some(n) => Ok(ProbeOutcome::completed().with_metric(f64::from(n))),
        None => Err(super::unrecognized(output)),
    }
}
