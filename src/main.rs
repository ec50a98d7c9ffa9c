use clap::Parser;
use tracing_subscriber::EnvFilter;

use pml::cli::{run, CliArgs};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    if let Err(err) = run(args).await {
        eprintln!("pml: {err}");
        std::process::exit(1);
    }
}
