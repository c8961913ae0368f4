//! Main entry point for the graft bookstore demo.

use clap::Parser;
use graft_bookstore::Cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graft=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Err(e) = graft_bookstore::run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
