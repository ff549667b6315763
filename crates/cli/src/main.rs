use clap::{Parser, Subcommand};
use perp_guard_core::ConfigLoader;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod venue;

use commands::{ActionArgs, StatusArgs};

#[derive(Parser)]
#[command(name = "perp-guard")]
#[command(about = "Risk engine for leveraged perpetual positions", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = "config/Config.toml")]
    config: PathBuf,

    /// Optional log file path (appends to the file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator until Ctrl+C
    Run,
    /// Open a position and wait for the venue to confirm it
    Open(ActionArgs),
    /// Close a position and wait for the venue to confirm it is flat
    Close(ActionArgs),
    /// Print the venue position and mark price as JSON
    Status(StatusArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_file.as_ref()) {
        eprintln!("failed to initialise logging: {e:#}");
        return ExitCode::FAILURE;
    }

    let result = async {
        let config = ConfigLoader::load_from(&cli.config)?;
        match cli.command {
            Commands::Run => commands::run(config).await,
            Commands::Open(args) => commands::open(&config, args).await,
            Commands::Close(args) => commands::close(&config, args).await,
            Commands::Status(args) => commands::status(&config, args).await,
        }
    }
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
