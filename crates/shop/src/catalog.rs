//! Administrative product management.

use bytes::Bytes;
use common::ProductId;
use storage::{BlobRef, IMAGES_CONTAINER, Storage, StorageError};

use crate::error::{Result, ShopError};
use crate::money::Money;
use crate::product::{CATALOG_PARTITION, Product};

/// Raw uploaded bytes plus the filename the uploader declared.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Bytes,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// Input for [`CatalogService::create_product`].
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub stock: u32,
}

/// Creates, edits and deletes products and their images.
#[derive(Debug, Clone)]
pub struct CatalogService {
    storage: Storage,
}

impl CatalogService {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Creates a product, uploading its image first if one is given.
    #[tracing::instrument(skip(self, product, image), fields(product_id = %product.id))]
    pub async fn create_product(
        &self,
        product: NewProduct,
        image: Option<Upload>,
    ) -> Result<Product> {
        if !product.price.is_positive() {
            return Err(ShopError::InvalidPrice(product.price));
        }

        let mut record = Product::new(product.id, product.name, product.price, product.stock)
            .with_description(product.description);
        if let Some(image) = image {
            let blob = self
                .storage
                .upload_image(&image.filename, image.bytes)
                .await?;
            record.image_ref = Some(blob.uri());
        }

        match self.storage.add(&record).await {
            Ok(stored) => {
                tracing::info!("product created");
                Ok(stored)
            }
            Err(e) => {
                self.discard_image(record.image_ref.as_deref()).await;
                Err(e.into())
            }
        }
    }

    pub async fn get_product(&self, product_id: &ProductId) -> Result<Product> {
        self.storage
            .find::<Product>(CATALOG_PARTITION, product_id.as_str())
            .await?
            .ok_or_else(|| ShopError::ProductNotFound(product_id.clone()))
    }

    pub async fn list_products(&self) -> Result<Vec<Product>> {
        let mut products = self.storage.get_all::<Product>().await?;
        products.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(products)
    }

    /// Saves edits to a product loaded earlier.
    ///
    /// Fails with a concurrency conflict if the product changed since.
    #[tracing::instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn update_product(&self, product: &Product) -> Result<Product> {
        if !product.price.is_positive() {
            return Err(ShopError::InvalidPrice(product.price));
        }
        Ok(self.storage.update(product).await?)
    }

    /// Uploads a new image for a product and deletes the old one.
    #[tracing::instrument(skip(self, image), fields(product_id = %product_id))]
    pub async fn replace_image(&self, product_id: &ProductId, image: Upload) -> Result<Product> {
        let mut product = self.get_product(product_id).await?;
        let blob = self
            .storage
            .upload_image(&image.filename, image.bytes)
            .await?;
        let old = product.image_ref.replace(blob.uri());

        match self.storage.update(&product).await {
            Ok(stored) => {
                self.discard_image(old.as_deref()).await;
                Ok(stored)
            }
            Err(e) => {
                self.discard_image(Some(&blob.uri())).await;
                Err(e.into())
            }
        }
    }

    /// Deletes a product, then its image.
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    pub async fn delete_product(&self, product_id: &ProductId) -> Result<()> {
        let product = self.get_product(product_id).await?;
        match self
            .storage
            .delete::<Product>(CATALOG_PARTITION, product_id.as_str())
            .await
        {
            Ok(()) => {}
            Err(StorageError::NotFound { .. }) => {
                return Err(ShopError::ProductNotFound(product_id.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        self.discard_image(product.image_ref.as_deref()).await;
        tracing::info!("product deleted");
        Ok(())
    }

    /// Adds stock to a product.
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    pub async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<Product> {
        if quantity == 0 {
            return Err(ShopError::InvalidQuantity(0));
        }
        let mut product = self.get_product(product_id).await?;
        product.increment_stock(quantity)?;
        let stored = self.storage.update(&product).await?;
        tracing::info!(stock = stored.stock, "product restocked");
        Ok(stored)
    }

    /// Uploads a file to the shared file store.
    ///
    /// Returns an empty string when the file share isn't available.
    pub async fn upload_attachment(&self, upload: Upload) -> Result<String> {
        Ok(self
            .storage
            .upload_to_file_share(&upload.filename, upload.bytes)
            .await?)
    }

    /// Deletes an image blob, logging instead of failing.
    async fn discard_image(&self, image_ref: Option<&str>) {
        let Some(uri) = image_ref else {
            return;
        };
        let Some(blob) = BlobRef::parse(uri).filter(|b| b.container == IMAGES_CONTAINER) else {
            tracing::warn!(image_ref = uri, "not an image blob reference; leaving it");
            return;
        };
        if let Err(e) = self.storage.delete_image(&blob.name).await {
            tracing::warn!(image_ref = uri, error = %e, "failed to delete image");
        }
    }
}
