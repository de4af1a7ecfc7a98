//! 测试公共设施：内存 SQLite + 内存快速存储

use crate::config::{BloomConfig, LedgerConfig, ReaperConfig};
use crate::entities::{
    SeckillStatus, product_entity as products, product_sku_entity as skus,
    seckill_product_entity as seckill_products,
};
use crate::services::{
    AdminSeckillService, ExistenceFilter, InventoryCache, OrderService, SeckillService,
};
use crate::store::{MemoryStore, SharedStore};
use crate::tasks::{ExpiryReaper, LedgerWriter};
use crate::utils::OrderNumGenerator;
use chrono::{DateTime, Duration, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use std::sync::Arc;

pub const ORDER_EXPIRE_MINUTES: i64 = 30;

pub async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

/// 测试环境的完整组件
pub struct Harness {
    pub db: DatabaseConnection,
    pub memory: MemoryStore,
    pub store: SharedStore,
    pub inventory: InventoryCache,
    pub filter: ExistenceFilter,
    pub seckill: SeckillService,
    pub orders: OrderService,
    pub admin: AdminSeckillService,
    pub ledger: LedgerWriter,
    pub reaper: ExpiryReaper,
}

impl Harness {
    pub async fn new() -> Self {
        let db = setup_db().await;
        let memory = MemoryStore::default();
        let store: SharedStore = Arc::new(memory.clone());
        let inventory = InventoryCache::new(store.clone(), 24 * 7, 24);
        let filter = ExistenceFilter::new(store.clone(), BloomConfig::default());
        filter.load_or_rebuild(&db).await.unwrap();
        let order_nums = OrderNumGenerator::new(1);

        let seckill = SeckillService::new(
            inventory.clone(),
            filter.clone(),
            order_nums.clone(),
            ORDER_EXPIRE_MINUTES,
        );
        let orders = OrderService::new(
            db.clone(),
            store.clone(),
            inventory.clone(),
            order_nums,
            ORDER_EXPIRE_MINUTES,
        );
        let admin = AdminSeckillService::new(
            db.clone(),
            store.clone(),
            inventory.clone(),
            filter.clone(),
        );
        let ledger = LedgerWriter::new(
            db.clone(),
            store.clone(),
            LedgerConfig {
                pop_timeout_secs: 1,
                ..LedgerConfig::default()
            },
        );
        let reaper = ExpiryReaper::new(store.clone(), orders.clone(), ReaperConfig::default());

        Self {
            db,
            memory,
            store,
            inventory,
            filter,
            seckill,
            orders,
            admin,
            ledger,
            reaper,
        }
    }

    /// 写入商品与 SKU，返回 (product_id, sku_id)
    pub async fn seed_product(&self, sku_stock: i64) -> (i64, i64) {
        let now = Utc::now();
        let product = products::ActiveModel {
            name: Set("Phone".into()),
            title: Set("Flagship phone".into()),
            info: Set("8G+256G".into()),
            img_path: Set("/img/phone.png".into()),
            price: Set(399_900),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .unwrap();

        let sku = skus::ActiveModel {
            product_id: Set(product.id),
            title: Set("Black".into()),
            price: Set(399_900),
            stock: Set(sku_stock),
            code: Set("PHONE-BLK".into()),
            version: Set(0),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .unwrap();

        (product.id, sku.id)
    }

    /// 直接写入秒杀商品行（绕过管理端校验）
    pub async fn seed_seckill(
        &self,
        product_id: i64,
        sku_id: i64,
        stock: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> seckill_products::Model {
        let model = seckill_products::ActiveModel {
            product_id: Set(product_id),
            sku_id: Set(sku_id),
            seckill_price: Set(99_900),
            seckill_stock: Set(stock),
            stock: Set(stock),
            limit_per_user: Set(1),
            start_time: Set(start),
            end_time: Set(end),
            status: Set(SeckillStatus::NotStarted),
            version: Set(0),
            created_at: Set(Some(Utc::now())),
            updated_at: Set(Some(Utc::now())),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .unwrap();
        self.filter.add(model.id).await;
        model
    }

    /// 已预热、正在进行中的秒杀商品
    pub async fn live_seckill(&self, stock: i64) -> seckill_products::Model {
        let (product_id, sku_id) = self.seed_product(stock + 10).await;
        let now = Utc::now();
        let model = self
            .seed_seckill(
                product_id,
                sku_id,
                stock,
                now - Duration::minutes(5),
                now + Duration::hours(1),
            )
            .await;
        self.admin.preheat(model.id).await.unwrap();
        model
    }
}
