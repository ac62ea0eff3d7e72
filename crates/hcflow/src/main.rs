mod apply;
mod commands;
mod manifest;
mod plan;
mod provider;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser)]
#[command(name = "hcf")]
#[command(about = "Declarative Huawei Cloud resources from a KDL manifest", long_about = None)]
struct Cli {
    /// Manifest file
    #[arg(
        short = 'f',
        long = "file",
        env = "HCFLOW_FILE",
        default_value = manifest::DEFAULT_MANIFEST,
        global = true
    )]
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the changes apply would make
    Plan,
    /// Create, update and delete resources to match the manifest
    Apply {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete every resource recorded in the state
    Destroy {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show recorded resources, or one resource in detail
    Show {
        /// Resource address, e.g. rds_instance.main
        address: Option<String>,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries plans and results, logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();

    match cli.command {
        Commands::Plan => commands::plan::handle(&cli.file).await,
        Commands::Apply { yes } => commands::apply::handle(&cli.file, yes).await,
        Commands::Destroy { yes } => commands::destroy::handle(&cli.file, yes).await,
        Commands::Show { address } => commands::show::handle(&cli.file, address.as_deref()).await,
        Commands::Version => {
            println!("hcflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
