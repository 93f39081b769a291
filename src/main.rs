use anyhow::anyhow;
use env_logger::Env;
use log::{error, info};
use rustls::crypto::{CryptoProvider, ring};

use link_digest_collector::{Orchestrator, Registry, load_config};

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Load and validate configuration
// - Initialize logging
// - Build every component, then run until Ctrl-C
//
// Usage: link-digest-collector [config.json]
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation, once and before any TLS connection.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow!("failed to install rustls CryptoProvider"))?;

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = load_config(&path)?;

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(Env::default().default_filter_or(config.logging.level.as_str()))
        .init();
    info!("configuration loaded from {}", path);

    let registry = Registry::builtin();
    let orchestrator = match Orchestrator::build(config, &registry) {
        Ok(o) => o,
        Err(e) => {
            error!("startup failed: {:#}", e);
            return Err(e);
        }
    };

    orchestrator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("listening for ctrl-c failed: {}", e);
                // never resolve: keep running without a signal handler
                futures_util::future::pending::<()>().await;
            }
            info!("ctrl-c received");
        })
        .await
}
