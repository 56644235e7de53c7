mod commands;

use clap::{Parser, Subcommand};
use commands::backends::BackendsArgs;
use commands::controller::{ControllerArgs, MacArgs, PollArgs, QuarantinedArgs, UploadArgs};
use commands::run::RunArgs;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mudnet")]
#[command(about = "Provision emulated networks and verify MUD policy enforcement")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    controller: ControllerArgs,

    /// More logging (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file
    Run(RunArgs),

    /// Reset the controller's derived MUD rules
    ClearRules,

    /// Upload a JSON document to a controller configuration resource
    Upload(UploadArgs),

    /// Quarantine a device by MAC address
    Quarantine(MacArgs),

    /// Release a device from quarantine
    Unquarantine(MacArgs),

    /// List quarantined MAC addresses
    Quarantined(QuarantinedArgs),

    /// Wait for the controller to report a MUD profile
    PollReport(PollArgs),

    /// Wait for a MUD report, then pull the controller's log for it
    CollectReports(PollArgs),

    /// Show available backends and their capabilities
    Backends(BackendsArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:?}");
            std::process::exit(2);
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns the process exit code.
async fn run(cli: Cli) -> anyhow::Result<i32> {
    let controller = &cli.controller;
    match cli.command {
        Commands::Run(args) => return commands::run::run(args, controller).await,
        Commands::ClearRules => commands::controller::clear_rules(controller).await?,
        Commands::Upload(args) => commands::controller::upload(args, controller).await?,
        Commands::Quarantine(args) => commands::controller::quarantine(args, controller).await?,
        Commands::Unquarantine(args) => {
            commands::controller::unquarantine(args, controller).await?
        }
        Commands::Quarantined(args) => commands::controller::quarantined(args, controller).await?,
        Commands::PollReport(args) => commands::controller::poll_report(args, controller).await?,
        Commands::CollectReports(args) => {
            commands::controller::collect_reports(args, controller).await?
        }
        Commands::Backends(args) => commands::backends::run(args),
        Commands::Version => println!("mudnet {}", env!("CARGO_PKG_VERSION")),
    }
    Ok(0)
}
