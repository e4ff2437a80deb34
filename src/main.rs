mod config;
mod firecrawl;
mod gemini;
mod markdown;
mod perplexity;
mod provider;
mod results;
mod search;
mod server;
mod workflow;

pub const USER_AGENT: &str = concat!("finsight/", env!("CARGO_PKG_VERSION"));

use std::net::SocketAddr;

use clap::Parser;
use config::Config;
use server::AppState;
use tracing::info;

#[derive(Parser)]
#[command(version, about = "Financial research chat service")]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "FINSIGHT_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("finsight=info".parse()?),
        )
        .init();

    info!("starting finsight");

    let config = Config::from_env()
        .inspect_err(|e| tracing::error!("invalid configuration: {e}"))?;
    let state = AppState::from_config(config)?;

    server::serve(state, cli.bind).await?;
    info!("server stopped");
    Ok(())
}
