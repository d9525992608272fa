use clap::Parser;
use dotenv::dotenv;
use env_logger::Env;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use rollout_analytics::analysis::AnalyticsEngine;
use rollout_analytics::config::AdvancedParameters;
use rollout_analytics::error::Result;
use rollout_analytics::secrets::{
    KubeSecretReader, SecretCache, SecretReader, UnavailableSecretReader,
};
use rollout_analytics::server;

/// Analytics service for progressive-delivery experiments
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let params = AdvancedParameters::from_env()?;

    let reader: Box<dyn SecretReader> = match KubeSecretReader::new().await {
        Ok(reader) => Box::new(reader),
        Err(err) => {
            warn!("Kubernetes client unavailable ({err}); secret-backed metrics will fail");
            Box::new(UnavailableSecretReader)
        }
    };
    let engine = Arc::new(AnalyticsEngine::new(SecretCache::new(reader), params));

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, server::router(engine)).await?;
    Ok(())
}
