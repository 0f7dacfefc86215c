//! Bootstrap entry point.

use bootstrap::Config;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = bootstrap::start(&config).await {
        tracing::error!(error = %e, "startup failed");
        std::process::exit(1);
    }

    tracing::info!("bootstrap finished");
}
