//! Direct controller operations: rule reset, uploads, quarantine and MUD
//! report polling.

use anyhow::Context;
use clap::Args;
use mudnet::{ControllerClient, ControllerConfig, DocumentKind, MacAddr, MudReport, Url};
use std::net::{IpAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Args)]
pub struct ControllerArgs {
    /// Controller host, host:port or RESTCONF URL
    #[arg(long, global = true, env = "CONTROLLER_ADDR")]
    controller: Option<String>,

    /// TOML file with controller settings (credentials, retries, timeouts)
    #[arg(long, global = true)]
    controller_config: Option<PathBuf>,
}

impl ControllerArgs {
    pub fn config(&self) -> anyhow::Result<ControllerConfig> {
        let mut config = match &self.controller_config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            None => ControllerConfig::default(),
        };
        if let Some(addr) = &self.controller {
            config.base_url = ControllerConfig::for_address(addr).base_url;
        }
        Ok(config)
    }

    pub fn client(&self) -> anyhow::Result<ControllerClient> {
        Ok(ControllerClient::new(self.config()?)?)
    }

    /// The address switches should dial for OpenFlow.
    pub fn openflow_host(&self) -> anyhow::Result<IpAddr> {
        let host = url_host(&self.config()?.base_url)?;
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        (host.as_str(), 0)
            .to_socket_addrs()
            .with_context(|| format!("resolving {host}"))?
            .map(|addr| addr.ip())
            .find(IpAddr::is_ipv4)
            .with_context(|| format!("{host} has no IPv4 address"))
    }
}

/// Host part of a controller URL, without IPv6 brackets.
fn url_host(url: &str) -> anyhow::Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("invalid controller URL {url}"))?;
    let host = parsed
        .host_str()
        .with_context(|| format!("no host in controller URL {url}"))?;
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

#[derive(Args)]
pub struct UploadArgs {
    /// Resource path under `config/`, or one of device-association,
    /// controller-class, sdnmud-config
    resource: String,

    /// JSON document
    file: PathBuf,
}

#[derive(Args)]
pub struct MacArgs {
    /// Device MAC address
    mac: MacAddr,
}

#[derive(Args)]
pub struct QuarantinedArgs {
    /// Output in JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
pub struct PollArgs {
    /// Restrict the query to these MUD URLs
    #[arg(long = "mud-url")]
    mud_urls: Vec<String>,

    /// Give up after this many seconds
    #[arg(long, default_value = "120")]
    timeout: u64,

    /// Initial delay between polls, in milliseconds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,
}

impl PollArgs {
    fn deadline(&self) -> Instant {
        Instant::now() + Duration::from_secs(self.timeout)
    }
}

pub async fn clear_rules(args: &ControllerArgs) -> anyhow::Result<()> {
    args.client()?.clear_rules().await?;
    eprintln!("MUD rules cleared.");
    Ok(())
}

pub async fn upload(upload: UploadArgs, args: &ControllerArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&upload.file)
        .with_context(|| format!("reading {}", upload.file.display()))?;
    let document: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", upload.file.display()))?;
    let resource = resource_for(&upload.resource);

    args.client()?
        .upload_configuration(&resource, &document)
        .await?;
    eprintln!("Uploaded {} to {resource}.", upload.file.display());
    Ok(())
}

fn resource_for(name: &str) -> String {
    let kind: Result<DocumentKind, _> =
        serde_json::from_value(serde_json::Value::String(name.to_string()));
    match kind {
        Ok(kind) => kind.resource().to_string(),
        Err(_) => name.to_string(),
    }
}

pub async fn quarantine(mac: MacArgs, args: &ControllerArgs) -> anyhow::Result<()> {
    args.client()?.quarantine(mac.mac).await?;
    eprintln!("{} quarantined.", mac.mac);
    Ok(())
}

pub async fn unquarantine(mac: MacArgs, args: &ControllerArgs) -> anyhow::Result<()> {
    args.client()?.unquarantine(mac.mac).await?;
    eprintln!("{} released.", mac.mac);
    Ok(())
}

pub async fn quarantined(list: QuarantinedArgs, args: &ControllerArgs) -> anyhow::Result<()> {
    let macs = args.client()?.get_quarantine_macs().await?;
    if list.json {
        let macs: Vec<String> = macs.iter().map(MacAddr::to_string).collect();
        println!("{}", serde_json::to_string_pretty(&macs)?);
    } else if macs.is_empty() {
        println!("No quarantined devices.");
    } else {
        for mac in macs {
            println!("{mac}");
        }
    }
    Ok(())
}

pub async fn poll_report(poll: PollArgs, args: &ControllerArgs) -> anyhow::Result<()> {
    let report = args
        .client()?
        .poll_mud_report(
            &poll.mud_urls,
            Duration::from_millis(poll.interval_ms),
            poll.deadline(),
        )
        .await?;
    print_report(&report)
}

pub async fn collect_reports(poll: PollArgs, args: &ControllerArgs) -> anyhow::Result<()> {
    let reports = args
        .client()?
        .collect_mud_reports(Duration::from_millis(poll.interval_ms), poll.deadline())
        .await?;
    for report in &reports {
        print_report(report)?;
    }
    Ok(())
}

fn print_report(report: &MudReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&report.output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_from_restconf_urls() {
        assert_eq!(url_host("http://10.0.4.3:8181/restconf").unwrap(), "10.0.4.3");
        assert_eq!(url_host("http://controller/restconf").unwrap(), "controller");
        assert_eq!(url_host("http://[::1]:8181/restconf").unwrap(), "::1");
        assert_eq!(url_host("HTTP://Controller:8181").unwrap(), "controller");
        assert!(url_host("mailto:admin@controller").is_err());
        assert!(url_host("not a url").is_err());
    }

    #[test]
    fn openflow_host_follows_controller_flag() {
        let args = ControllerArgs {
            controller: Some("10.0.4.3".to_string()),
            controller_config: None,
        };
        assert_eq!(args.openflow_host().unwrap().to_string(), "10.0.4.3");
    }

    #[test]
    fn document_kinds_map_to_resources() {
        assert_eq!(
            resource_for("device-association"),
            "nist-mud-device-association:mapping"
        );
        assert_eq!(resource_for("sdnmud:sdnmud-config"), "sdnmud:sdnmud-config");
    }

    #[test]
    fn config_file_is_overridden_by_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.toml");
        std::fs::write(&path, "password = \"s3cret\"\nretries = 1\n").unwrap();
        let args = ControllerArgs {
            controller: Some("127.0.0.1:18181".to_string()),
            controller_config: Some(path),
        };
        let config = args.config().unwrap();
        assert_eq!(config.password, "s3cret");
        assert_eq!(config.base_url, "http://127.0.0.1:18181/restconf");
    }
}
