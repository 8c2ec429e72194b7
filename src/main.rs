use clap::Parser;
use tracing_subscriber::EnvFilter;

use swesmith::cli::{Cli, Command};
use swesmith::pipeline;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => pipeline::run(args.into()).await,
        Command::Distill(args) => pipeline::distill(args.into()).await,
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "pipeline failed");
        std::process::exit(err.exit_code());
    }
}
