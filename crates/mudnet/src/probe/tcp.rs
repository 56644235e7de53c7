//! TCP connect and greeting exchange with an echo server.

use mudnet_core::{CommandOutput, ProbeOutcome, Result};

pub(crate) fn command(tool: &[String], target: &str, port: u16) -> Vec<String> {
    let mut argv = tool.to_vec();
    argv.extend([
        "-H".to_string(),
        target.to_string(),
        "-P".to_string(),
        port.to_string(),
    ]);
    argv
}

/// The client prints a line reading `OK` once the server answered.
pub(crate) fn parse(output: &CommandOutput) -> Result<ProbeOutcome> {
    let text = output.combined();
    if text.lines().any(|l| l.trim() == "OK") {
        return Ok(ProbeOutcome::completed());
    }
    let lower = text.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        return Ok(ProbeOutcome::timed_out());
    }
    if ["refused", "unreachable", "no route to host", "reset by peer"]
        .iter()
        .any(|m| lower.contains(m))
    {
        return Ok(ProbeOutcome::error());
    }
    Err(super::unrecognized(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudnet_core::ProbeStatus;

    #[test]
    fn builds_client_invocation() {
        let tool = vec!["python3".to_string(), "tcp-client.py".to_string()];
        assert_eq!(
            command(&tool, "10.0.0.3", 8010).join(" "),
            "python3 tcp-client.py -H 10.0.0.3 -P 8010"
        );
    }

    #[test]
    fn ok_line_is_success() {
        assert_eq!(
            parse(&CommandOutput::ok("connecting\nOK\n")).unwrap().status,
            ProbeStatus::Completed
        );
    }

    #[test]
    fn ok_inside_other_words_is_not_success() {
        assert_eq!(
            parse(&CommandOutput::failed(1, "BROKEN: connection refused"))
                .unwrap()
                .status,
            ProbeStatus::Error
        );
    }

    #[test]
    fn socket_timeout() {
        assert_eq!(
            parse(&CommandOutput::failed(1, "socket.timeout: timed out"))
                .unwrap()
                .status,
            ProbeStatus::TimedOut
        );
    }

    #[test]
    fn silent_exit_is_unrecognized() {
        assert!(parse(&CommandOutput::ok("")).is_err());
    }
}
