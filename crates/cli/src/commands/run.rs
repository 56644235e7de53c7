//! The `run` command - provisions a scenario's network and runs its probes.

use super::controller::ControllerArgs;
use anyhow::Context;
use clap::Args;
use mudnet::{Orchestrator, Scenario, ScenarioFile, host_commands, select_backend};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Args)]
pub struct RunArgs {
    /// Scenario file (TOML)
    #[arg(value_parser = parse_existing_file)]
    scenario: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Also write the JSON report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Address switches dial for OpenFlow (defaults to the controller host)
    #[arg(long)]
    openflow_host: Option<IpAddr>,

    /// Print the resolved plan and host commands without touching anything
    #[arg(long)]
    dry_run: bool,
}

pub async fn run(args: RunArgs, controller: &ControllerArgs) -> anyhow::Result<i32> {
    let mut scenario = ScenarioFile::load(&args.scenario)?;
    let openflow_host = match args.openflow_host {
        Some(ip) => ip,
        None => controller.openflow_host()?,
    };
    scenario.default_controller_host(openflow_host);
    scenario.validate()?;

    if args.dry_run {
        print_plan(&scenario)?;
        return Ok(0);
    }

    let backend = select_backend()?;
    let client = Arc::new(controller.client()?);
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, tearing down");
                shutdown.cancel();
            }
        });
    }

    let report = Orchestrator::new(backend, client)
        .run_until(&scenario, shutdown)
        .await;

    if let Some(path) = &args.report {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }

    Ok(if report.passed() { 0 } else { 1 })
}

fn print_plan(scenario: &Scenario) -> anyhow::Result<()> {
    let plan = scenario.plan.resolve(&scenario.topology)?;
    println!("scenario: {}", scenario.name);
    for (switch, endpoints) in &plan.switches {
        let targets: Vec<String> = endpoints.iter().map(|e| e.ovs_target()).collect();
        println!("  {switch} -> {}", targets.join(", "));
    }
    for host in &plan.hosts {
        println!("\n[{}] {}", host.name, host.mac);
        for cmd in host_commands(host) {
            let marker = if cmd.best_effort { "?" } else { "$" };
            println!("  {marker} {}", cmd.argv.join(" "));
        }
        for service in &host.services {
            println!("  & {}", service.command.join(" "));
        }
    }
    for group in &scenario.groups {
        println!("\ngroup {}", group.name);
        for probe in &group.probes {
            println!("  {probe} (expect {:?})", probe.expect);
        }
    }
    Ok(())
}

fn parse_existing_file(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if !path.exists() {
        return Err(format!("file not found: {s}"));
    }
    if !path.is_file() {
        return Err(format!("not a file: {s}"));
    }
    Ok(path)
}
