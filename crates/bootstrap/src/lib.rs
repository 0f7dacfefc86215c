//! Startup for the storage facade and shop services.

pub mod config;
pub mod error;
pub mod seed;

pub use config::Config;
pub use error::{BootstrapError, Result};
pub use seed::{SeedProduct, SeedSummary, load_seed, parse_seed, seed_catalog};

use shop::CatalogService;
use storage::Storage;

/// Connects the facade and seeds the catalog if a seed file is configured.
///
/// Only an invalid connection string fails. Provisioning problems are
/// logged in the report and a broken seed file is logged and skipped.
pub async fn start(config: &Config) -> Result<Storage> {
    let storage = Storage::connect(&config.storage).await?;
    tracing::info!(
        mode = %storage.mode(),
        file_share = storage.file_share_supported(),
        healthy = storage.provisioning_report().is_healthy(),
        "storage ready"
    );

    if let Some(path) = &config.seed_file {
        match load_seed(path).await {
            Ok(products) => {
                seed_catalog(&CatalogService::new(storage.clone()), products).await;
            }
            Err(e) => tracing::error!(error = %e, "skipping catalog seed"),
        }
    }

    Ok(storage)
}
