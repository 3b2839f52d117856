mod client;
mod config;
mod dns;
mod domain_tree;
mod health;
mod resolver;
mod server;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::client::DnsClient;
use crate::config::Config;
use crate::health::HealthRegistry;
use crate::resolver::Resolver;
use crate::server::DnsServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_dns=info".into()),
        )
        .init();

    info!("vigil-dns v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "vigil-dns.toml".to_string());

    let config = Config::load(&config_path)?;
    info!("Config loaded from {}", config_path);

    // Health registry and outbound client come first; the resolver
    // registers probes and builds the domain index on top of them
    let registry = Arc::new(HealthRegistry::new()?);
    let client = Arc::new(DnsClient::new(Duration::from_secs(config.query_timeout_secs)).await?);
    let resolver = Arc::new(Resolver::new(&config, registry.clone(), client.clone())?);
    info!("{} health checks registered", registry.len());

    let server = DnsServer::bind(&config.listen, resolver).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            registry.shutdown();
            client.shutdown();
        }
    }

    Ok(())
}
