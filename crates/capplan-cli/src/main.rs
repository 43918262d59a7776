use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::convert::{ConvertArgs, SheetArgs};
use commands::provision::ProvisionFlags;

#[derive(Parser)]
#[command(
    name = "capplan",
    about = "capplan: sizing sheets to capacity reservations and databases",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to capplan.toml (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a sizing sheet into resource and reservation payloads
    Convert(ConvertArgs),
    /// Provision a previously converted combined payload
    Provision {
        /// Combined JSON document written by `capplan convert`
        #[arg(short, long)]
        payload: PathBuf,
        #[command(flatten)]
        flags: ProvisionFlags,
    },
    /// Convert a sizing sheet and provision it in one go
    Run {
        #[command(flatten)]
        sheet: SheetArgs,
        #[command(flatten)]
        flags: ProvisionFlags,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,capplan=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = capplan_core::CapplanConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Convert(args) => {
            commands::convert::run(&args, &config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Provision { payload, flags } => {
            commands::provision::provision_payload(&payload, &flags, config).await
        }
        Commands::Run { sheet, flags } => {
            commands::provision::convert_and_provision(&sheet, &flags, config).await
        }
    }
}
