use std::sync::Arc;

use anyhow::Context;
use cas_gateway::args::Args;
use cas_gateway::server::listener;
use cas_gateway::{Config, Gateway};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    let config_path = args.config_path();
    let mut cfg = Config::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    args.apply(&mut cfg);

    let gateway = Arc::new(Gateway::from_config(&cfg)?);
    tracing::info!(
        routes = gateway.routes().len(),
        cas = %cfg.cas.base_url,
        "Gateway configured"
    );

    let addr = cfg.listen_addr();

    tokio::select! {
        res = listener::run(&addr, gateway) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
