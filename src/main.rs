use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use docqa::cli::commands::{
    handle_ask, handle_config, handle_documents, handle_ingest, handle_search, handle_status,
};
use docqa::cli::{Cli, Commands};
use docqa::models::{Config, LogFormat, OutputFormat};
use docqa::utils::CancelToken;

/// Install the tracing subscriber. `RUST_LOG` wins over `--verbose`, which
/// wins over the configured level.
fn init_tracing(config: &Config, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { config.log.level.as_str() };
        EnvFilter::new(format!("docqa={level}"))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_target(false).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load().unwrap_or_default();
    init_tracing(&config, cli.verbose);

    let format = cli.format.unwrap_or_default();
    let verbose = cli.verbose;

    let cancel = CancelToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        eprintln!("\nReceived shutdown signal, stopping at the next checkpoint...");
        watcher.cancel();
    });

    run_command(cli.command, format, verbose, cancel).await
}

async fn run_command(
    command: Commands,
    format: OutputFormat,
    verbose: bool,
    cancel: CancelToken,
) -> Result<()> {
    match command {
        Commands::Ingest(args) => {
            handle_ingest(args, format, verbose, cancel).await?;
        }
        Commands::Ask(args) => {
            handle_ask(args, format, verbose, cancel).await?;
        }
        Commands::Search(args) => {
            handle_search(args, format, verbose, cancel).await?;
        }
        Commands::Documents(cmd) => {
            handle_documents(cmd, format, verbose).await?;
        }
        Commands::Status => {
            handle_status(format, verbose).await?;
        }
        Commands::Config(cmd) => {
            handle_config(cmd, format, verbose).await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
