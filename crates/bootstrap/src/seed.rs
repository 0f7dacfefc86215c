//! Catalog seeding from a JSON file.

use std::path::Path;

use common::ProductId;
use serde::Deserialize;
use shop::{CatalogService, Money, NewProduct, ShopError};

use crate::error::{BootstrapError, Result};

/// One product entry in a seed file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedProduct {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price_cents: i64,
    pub stock: u32,
}

impl From<SeedProduct> for NewProduct {
    fn from(seed: SeedProduct) -> Self {
        NewProduct {
            id: ProductId::new(seed.id),
            name: seed.name,
            description: seed.description,
            price: Money::from_cents(seed.price_cents),
            stock: seed.stock,
        }
    }
}

/// Counts from one seeding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Parses a seed file holding a JSON array of products.
pub fn parse_seed(json: &str) -> Result<Vec<SeedProduct>> {
    Ok(serde_json::from_str(json)?)
}

/// Reads and parses a seed file.
pub async fn load_seed(path: &Path) -> Result<Vec<SeedProduct>> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| BootstrapError::SeedFile {
            path: path.to_path_buf(),
            source,
        })?;
    parse_seed(&json)
}

/// Creates every product whose id isn't in the catalog yet.
///
/// A product that fails to save is logged and counted; the rest still run.
#[tracing::instrument(skip_all, fields(count = products.len()))]
pub async fn seed_catalog(catalog: &CatalogService, products: Vec<SeedProduct>) -> SeedSummary {
    let mut summary = SeedSummary::default();
    for seed in products {
        let id = ProductId::new(seed.id.clone());
        match catalog.get_product(&id).await {
            Ok(_) => {
                summary.skipped += 1;
                continue;
            }
            Err(ShopError::ProductNotFound(_)) => {}
            Err(e) => {
                tracing::warn!(product_id = %id, error = %e, "failed to check seed product");
                summary.failed += 1;
                continue;
            }
        }

        match catalog.create_product(seed.into(), None).await {
            Ok(_) => summary.created += 1,
            Err(e) if e.is_conflict() => summary.skipped += 1,
            Err(e) => {
                tracing::warn!(product_id = %id, error = %e, "failed to seed product");
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        created = summary.created,
        skipped = summary.skipped,
        failed = summary.failed,
        "catalog seeded"
    );
    summary
}
