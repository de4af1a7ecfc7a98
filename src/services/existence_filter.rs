use crate::config::BloomConfig;
use crate::entities::seckill_product_entity as seckill_products;
use crate::error::AppResult;
use crate::store::{SharedStore, keys};
use crate::utils::BloomFilter;
use sea_orm::{DatabaseConnection, EntityTrait, QuerySelect};
use std::sync::{Arc, RwLock};
use std::time::Duration;

const PERSIST_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// 秒杀商品 ID 的布隆过滤器，拦截一定不存在的 ID
#[derive(Clone)]
pub struct ExistenceFilter {
    store: SharedStore,
    filter: Arc<RwLock<BloomFilter>>,
    config: BloomConfig,
}

impl ExistenceFilter {
    pub fn new(store: SharedStore, config: BloomConfig) -> Self {
        let filter = BloomFilter::with_estimates(config.expected_items, config.false_positive_rate);
        Self {
            store,
            filter: Arc::new(RwLock::new(filter)),
            config,
        }
    }

    /// 优先从快速存储加载；缺失或损坏时从数据库重建并回存
    pub async fn load_or_rebuild(&self, db: &DatabaseConnection) -> AppResult<()> {
        match self.store.load_blob(keys::SECKILL_BLOOM).await {
            Ok(Some(bytes)) => match BloomFilter::from_bytes(&bytes) {
                Ok(loaded) => {
                    log::info!(
                        "Seckill bloom filter loaded ({} bits, {} hashes)",
                        loaded.num_bits(),
                        loaded.num_hashes()
                    );
                    *self.filter.write().unwrap_or_else(|p| p.into_inner()) = loaded;
                    return Ok(());
                }
                Err(e) => log::warn!("Persisted seckill bloom filter is corrupt: {e}"),
            },
            Ok(None) => log::info!("No persisted seckill bloom filter, rebuilding"),
            Err(e) => log::warn!("Failed to load seckill bloom filter: {e}"),
        }

        let count = self.rebuild(db).await?;
        log::info!("Seckill bloom filter rebuilt with {count} ids");
        self.persist().await;
        Ok(())
    }

    async fn rebuild(&self, db: &DatabaseConnection) -> AppResult<usize> {
        let ids: Vec<i64> = seckill_products::Entity::find()
            .select_only()
            .column(seckill_products::Column::Id)
            .into_tuple()
            .all(db)
            .await?;

        let mut fresh =
            BloomFilter::with_estimates(self.config.expected_items, self.config.false_positive_rate);
        for id in &ids {
            fresh.add_id(*id);
        }
        *self.filter.write().unwrap_or_else(|p| p.into_inner()) = fresh;
        Ok(ids.len())
    }

    pub fn might_contain(&self, id: i64) -> bool {
        self.filter
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_id(id)
    }

    /// 加入并回存；回存失败只记录日志
    pub async fn add(&self, id: i64) {
        self.filter
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .add_id(id);
        self.persist().await;
    }

    async fn persist(&self) {
        let bytes = self
            .filter
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .to_bytes();
        if let Err(e) = self
            .store
            .save_blob(keys::SECKILL_BLOOM, &bytes, PERSIST_TTL)
            .await
        {
            log::warn!("Failed to persist seckill bloom filter: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use chrono::{Duration as ChronoDuration, Utc};

    #[tokio::test]
    async fn test_rebuilds_from_database_when_blob_missing() {
        let h = Harness::new().await;
        let (product_id, sku_id) = h.seed_product(10).await;
        let now = Utc::now();
        let seckill = h
            .seed_seckill(product_id, sku_id, 1, now, now + ChronoDuration::hours(1))
            .await;

        // 新实例、空存储：只能从数据库重建
        let fresh_store: SharedStore = Arc::new(crate::store::MemoryStore::new());
        let filter = ExistenceFilter::new(fresh_store.clone(), BloomConfig::default());
        assert!(!filter.might_contain(seckill.id));
        filter.load_or_rebuild(&h.db).await.unwrap();
        assert!(filter.might_contain(seckill.id));
        assert!(fresh_store.load_blob(keys::SECKILL_BLOOM).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_loads_persisted_blob() {
        let h = Harness::new().await;
        h.filter.add(31_337).await;

        // 同一存储上的新实例直接加载回存的位图
        let reloaded = ExistenceFilter::new(h.store.clone(), BloomConfig::default());
        reloaded.load_or_rebuild(&h.db).await.unwrap();
        assert!(reloaded.might_contain(31_337));
    }

    #[tokio::test]
    async fn test_corrupt_blob_triggers_rebuild() {
        let h = Harness::new().await;
        h.store
            .save_blob(keys::SECKILL_BLOOM, b"garbage", PERSIST_TTL)
            .await
            .unwrap();

        let filter = ExistenceFilter::new(h.store.clone(), BloomConfig::default());
        filter.load_or_rebuild(&h.db).await.unwrap();
        let bytes = h.store.load_blob(keys::SECKILL_BLOOM).await.unwrap().unwrap();
        assert!(BloomFilter::from_bytes(&bytes).is_ok());
    }
}
