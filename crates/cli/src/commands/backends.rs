//! The `backends` command - shows available backends and their capabilities.

use clap::Args;
use mudnet::capabilities::{BackendCapabilities, NetworkBackend, available_backends};
use serde::Serialize;

#[derive(Args)]
pub struct BackendsArgs {
    /// Output in JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct BackendInfo {
    name: &'static str,
    available: bool,
    capabilities: BackendCapabilities,
}

pub fn run(args: BackendsArgs) {
    let backends = available_backends();

    if args.json {
        print_json(&backends);
    } else {
        print_text(&backends);
    }
}

fn print_json(backends: &[Box<dyn NetworkBackend>]) {
    let infos: Vec<BackendInfo> = backends
        .iter()
        .map(|backend| BackendInfo {
            name: backend.name(),
            available: backend.is_available(),
            capabilities: backend.capabilities().clone(),
        })
        .collect();
    match serde_json::to_string_pretty(&serde_json::json!({ "backends": infos })) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error: {e}"),
    }
}

fn print_text(backends: &[Box<dyn NetworkBackend>]) {
    if backends.is_empty() {
        println!("No backends available.");
        return;
    }

    println!("Available backends:");
    println!();

    for backend in backends {
        let caps = backend.capabilities();
        let status = if backend.is_available() {
            "Available"
        } else {
            "Not available"
        };

        println!("  {}", backend.name());
        println!("    Status: {status}");
        println!("    OpenFlow switches: {}", yes_no(caps.openflow));
        println!("    Background services: {}", yes_no(caps.background_services));
        println!("    Requires root: {}", yes_no(caps.requires_root));
        if let Some(max) = caps.max_hosts {
            println!("    Limits: hosts={max}");
        }
        println!();
    }
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}
