//! Shop read/write paths over the cache layer.

use std::sync::Arc;

use tracing::debug;

use crate::cache::{CacheClient, keys};
use crate::domain::entities::ShopRecord;
use crate::domain::error::DomainError;

use super::error::AppError;
use super::repos::ShopsRepo;

#[derive(Clone)]
pub struct ShopService {
    cache: CacheClient,
    shops: Arc<dyn ShopsRepo>,
}

impl ShopService {
    pub fn new(cache: CacheClient, shops: Arc<dyn ShopsRepo>) -> Self {
        Self { cache, shops }
    }

    /// Cached lookup with null caching: ids that exist nowhere are absorbed
    /// by the sentinel instead of hammering the database.
    pub async fn shop_by_id(&self, id: u64) -> Result<Option<ShopRecord>, AppError> {
        let shops = self.shops.clone();
        let ttl = self.cache.config().shop_ttl;
        let shop = self
            .cache
            .get_with_null_caching(keys::SHOP_CACHE_PREFIX, id, ttl, move |id| async move {
                shops.find_by_id(id).await
            })
            .await?;
        Ok(shop)
    }

    /// Updates the relational row first, then drops the cache entry; the
    /// next read repopulates from the fresh truth.
    pub async fn update_shop(&self, shop: &ShopRecord) -> Result<(), AppError> {
        if shop.id == 0 {
            return Err(DomainError::validation("shop id is required").into());
        }

        self.shops.update(shop).await?;
        self.cache.invalidate(keys::SHOP_CACHE_PREFIX, shop.id).await?;
        debug!(shop_id = shop.id, "Shop updated, cache entry invalidated");
        Ok(())
    }
}
