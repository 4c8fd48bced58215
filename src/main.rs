use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use pgproxy::backend::{MemoryBackend, SharedBackend};
use pgproxy::config::ProxyConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = ProxyConfig::load()?;
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "pgproxy",
        "pgproxy starting: RUST_LOG='{}', bind={}, fixtures={:?}, trace={}, server_version={}",
        rust_log, config.bind, config.fixtures, config.trace, config.server_version
    );

    let backend: SharedBackend = match &config.fixtures {
        Some(path) => {
            let b = MemoryBackend::load(path).with_context(|| format!("loading fixtures from {}", path.display()))?;
            info!(target: "pgproxy", "loaded fixtures for destinations {:?}", b.destinations());
            Arc::new(b)
        }
        None => Arc::new(MemoryBackend::default()),
    };

    pgproxy::pgwire_server::start_pgwire(backend, config).await
}
