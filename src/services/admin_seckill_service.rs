use crate::entities::{
    SeckillStatus, product_entity as products, product_sku_entity as skus,
    seckill_product_entity as seckill_products,
};
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::services::{ExistenceFilter, InventoryCache, PreheatOutcome};
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};

#[derive(Clone)]
pub struct AdminSeckillService {
    pool: DatabaseConnection,
    store: SharedStore,
    inventory: InventoryCache,
    filter: ExistenceFilter,
}

impl AdminSeckillService {
    pub fn new(
        pool: DatabaseConnection,
        store: SharedStore,
        inventory: InventoryCache,
        filter: ExistenceFilter,
    ) -> Self {
        Self {
            pool,
            store,
            inventory,
            filter,
        }
    }

    async fn find(&self, id: i64) -> AppResult<seckill_products::Model> {
        seckill_products::Entity::find_by_id(id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("秒杀商品不存在".into()))
    }

    pub async fn create(
        &self,
        req: CreateSeckillProductRequest,
    ) -> AppResult<SeckillProductResponse> {
        if req.seckill_price <= 0 || req.seckill_stock <= 0 {
            return Err(AppError::ValidationError("秒杀价格和库存必须大于 0".into()));
        }
        if req.start_time >= req.end_time {
            return Err(AppError::ValidationError("开始时间必须早于结束时间".into()));
        }
        let limit_per_user = req.limit_per_user.unwrap_or(1);
        if limit_per_user != 1 {
            return Err(AppError::ValidationError("每人限购数量只能为 1".into()));
        }

        products::Entity::find_by_id(req.product_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("商品不存在".into()))?;
        let sku = skus::Entity::find_by_id(req.sku_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("SKU 不存在".into()))?;
        if sku.product_id != req.product_id {
            return Err(AppError::ValidationError("SKU 不属于该商品".into()));
        }
        if sku.stock < req.seckill_stock {
            return Err(AppError::ValidationError("SKU 库存不足以覆盖秒杀库存".into()));
        }

        let now = Utc::now();
        let created = seckill_products::ActiveModel {
            product_id: Set(req.product_id),
            sku_id: Set(req.sku_id),
            seckill_price: Set(req.seckill_price),
            seckill_stock: Set(req.seckill_stock),
            stock: Set(req.seckill_stock),
            limit_per_user: Set(limit_per_user),
            start_time: Set(req.start_time),
            end_time: Set(req.end_time),
            status: Set(SeckillStatus::NotStarted),
            version: Set(0),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            ..Default::default()
        }
        .insert(&self.pool)
        .await?;

        self.filter.add(created.id).await;
        log::info!("Seckill product {} created", created.id);
        Ok(created.into())
    }

    pub async fn delete(&self, id: i64) -> AppResult<()> {
        let existing = self.find(id).await?;
        // 先删库再清缓存，删库失败时活动仍可售
        seckill_products::Entity::delete_by_id(existing.id)
            .exec(&self.pool)
            .await?;
        self.inventory.evict(existing.id).await?;
        log::info!("Seckill product {id} deleted");
        Ok(())
    }

    pub async fn set_status(
        &self,
        id: i64,
        status: SeckillStatus,
    ) -> AppResult<SeckillProductResponse> {
        let current = self.find(id).await?;
        let result = seckill_products::Entity::update_many()
            .col_expr(seckill_products::Column::Status, Expr::value(status))
            .col_expr(
                seckill_products::Column::Version,
                Expr::col(seckill_products::Column::Version).add(1),
            )
            .col_expr(seckill_products::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(seckill_products::Column::Id.eq(id))
            .filter(seckill_products::Column::Version.eq(current.version))
            .exec(&self.pool)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::VersionConflict(format!("seckill product {id}")));
        }
        Ok(self.find(id).await?.into())
    }

    /// 将秒杀商品的最终状态写入快速存储；重复预热返回 AlreadyPreheated
    pub async fn preheat(&self, id: i64) -> AppResult<PreheatResponse> {
        let seckill = self.find(id).await?;
        if seckill.status != SeckillStatus::NotStarted {
            return Err(AppError::ValidationError("只能预热未开始的秒杀商品".into()));
        }
        let sku = skus::Entity::find_by_id(seckill.sku_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("SKU 不存在".into()))?;
        if sku.stock < seckill.seckill_stock {
            return Err(AppError::ValidationError("SKU 库存不足以覆盖秒杀库存".into()));
        }
        let product = products::Entity::find_by_id(seckill.product_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("商品不存在".into()))?;

        let snapshot = SeckillSnapshot {
            seckill_id: seckill.id,
            product_id: product.id,
            product_name: product.name,
            product_title: product.title,
            product_info: product.info,
            product_img: product.img_path,
            sku_id: sku.id,
            sku_title: sku.title,
            sku_code: sku.code,
            original_price: sku.price,
            seckill_price: seckill.seckill_price,
            seckill_stock: seckill.seckill_stock,
            start_time: seckill.start_time.timestamp(),
            end_time: seckill.end_time.timestamp(),
        };

        let now_ts = Utc::now().timestamp();
        match self.inventory.preheat(&snapshot, seckill.stock, now_ts).await? {
            PreheatOutcome::Preheated => {
                log::info!("Seckill product {id} preheated with stock {}", seckill.stock);
                Ok(PreheatResponse {
                    seckill_id: id,
                    stock: seckill.stock,
                    expire_at: ts_to_datetime(self.inventory.preheat_expire_ts(&snapshot)),
                })
            }
            PreheatOutcome::AlreadyPreheated => Err(AppError::AlreadyPreheated(id)),
        }
    }

    pub async fn dead_letters(
        &self,
        params: &PaginationParams,
    ) -> AppResult<PaginatedResponse<DeadLetterResponse>> {
        let total = self.store.dead_letter_count().await?;
        let list = self
            .store
            .dead_letters(params.get_offset(), params.get_limit())
            .await?
            .into_iter()
            .map(DeadLetterResponse::parse)
            .collect();
        Ok(PaginatedResponse::new(list, params, total))
    }

    /// 按时间推进活动状态：未开始→进行中，未结束→已结束；返回变更行数
    pub async fn sweep_statuses(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let started = seckill_products::Entity::update_many()
            .col_expr(
                seckill_products::Column::Status,
                Expr::value(SeckillStatus::Active),
            )
            .col_expr(
                seckill_products::Column::Version,
                Expr::col(seckill_products::Column::Version).add(1),
            )
            .col_expr(seckill_products::Column::UpdatedAt, Expr::value(now))
            .filter(seckill_products::Column::Status.eq(SeckillStatus::NotStarted))
            .filter(seckill_products::Column::StartTime.lte(now))
            .filter(seckill_products::Column::EndTime.gt(now))
            .exec(&self.pool)
            .await?;

        let ended = seckill_products::Entity::update_many()
            .col_expr(
                seckill_products::Column::Status,
                Expr::value(SeckillStatus::Ended),
            )
            .col_expr(
                seckill_products::Column::Version,
                Expr::col(seckill_products::Column::Version).add(1),
            )
            .col_expr(seckill_products::Column::UpdatedAt, Expr::value(now))
            .filter(seckill_products::Column::Status.ne(SeckillStatus::Ended))
            .filter(seckill_products::Column::EndTime.lte(now))
            .exec(&self.pool)
            .await?;

        Ok(started.rows_affected + ended.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use chrono::Duration;
    use sea_orm::ConnectionTrait;

    fn create_req(product_id: i64, sku_id: i64, stock: i64) -> CreateSeckillProductRequest {
        let now = Utc::now();
        CreateSeckillProductRequest {
            product_id,
            sku_id,
            seckill_price: 99_900,
            seckill_stock: stock,
            limit_per_user: None,
            start_time: now + Duration::minutes(10),
            end_time: now + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn test_create_registers_in_filter() {
        let h = Harness::new().await;
        let (product_id, sku_id) = h.seed_product(50).await;

        let created = h.admin.create(create_req(product_id, sku_id, 10)).await.unwrap();
        assert_eq!(created.status, SeckillStatus::NotStarted);
        assert_eq!(created.stock, 10);
        assert_eq!(created.limit_per_user, 1);
        assert!(h.filter.might_contain(created.id));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_requests() {
        let h = Harness::new().await;
        let (product_id, sku_id) = h.seed_product(5).await;

        let mut req = create_req(product_id, sku_id, 2);
        req.limit_per_user = Some(2);
        assert!(matches!(
            h.admin.create(req).await,
            Err(AppError::ValidationError(_))
        ));

        let mut req = create_req(product_id, sku_id, 2);
        req.end_time = req.start_time;
        assert!(matches!(
            h.admin.create(req).await,
            Err(AppError::ValidationError(_))
        ));

        // 秒杀库存超过 SKU 库存
        assert!(matches!(
            h.admin.create(create_req(product_id, sku_id, 6)).await,
            Err(AppError::ValidationError(_))
        ));

        assert!(matches!(
            h.admin.create(create_req(product_id, 999, 1)).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_preheat_is_idempotent() {
        let h = Harness::new().await;
        let (product_id, sku_id) = h.seed_product(50).await;
        let created = h.admin.create(create_req(product_id, sku_id, 10)).await.unwrap();

        let first = h.admin.preheat(created.id).await.unwrap();
        assert_eq!(first.stock, 10);

        let again = h.admin.preheat(created.id).await;
        assert!(matches!(again, Err(AppError::AlreadyPreheated(id)) if id == created.id));
        assert_eq!(h.inventory.stock(created.id).await.unwrap(), Some(10));

        let snapshot = h.inventory.snapshot(created.id).await.unwrap().unwrap();
        assert_eq!(snapshot.sku_title, "Black");
        assert_eq!(snapshot.original_price, 399_900);
    }

    #[tokio::test]
    async fn test_preheat_requires_not_started() {
        let h = Harness::new().await;
        let (product_id, sku_id) = h.seed_product(50).await;
        let created = h.admin.create(create_req(product_id, sku_id, 10)).await.unwrap();
        h.admin
            .set_status(created.id, SeckillStatus::Active)
            .await
            .unwrap();

        assert!(matches!(
            h.admin.preheat(created.id).await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_set_status_bumps_version() {
        let h = Harness::new().await;
        let (product_id, sku_id) = h.seed_product(50).await;
        let created = h.admin.create(create_req(product_id, sku_id, 10)).await.unwrap();

        let updated = h
            .admin
            .set_status(created.id, SeckillStatus::Ended)
            .await
            .unwrap();
        assert_eq!(updated.status, SeckillStatus::Ended);
        assert_eq!(updated.version, created.version + 1);

        assert!(matches!(
            h.admin.set_status(404, SeckillStatus::Ended).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_evicts_fast_store() {
        let h = Harness::new().await;
        let seckill = h.live_seckill(4).await;
        assert!(h.inventory.snapshot(seckill.id).await.unwrap().is_some());

        h.admin.delete(seckill.id).await.unwrap();
        assert!(h.inventory.snapshot(seckill.id).await.unwrap().is_none());
        assert_eq!(h.inventory.stock(seckill.id).await.unwrap(), None);
        assert!(matches!(
            h.admin.delete(seckill.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_product_on_sale() {
        let h = Harness::new().await;
        let seckill = h.live_seckill(4).await;
        h.db.execute_unprepared(
            "CREATE TRIGGER keep_seckill BEFORE DELETE ON seckill_products \
             BEGIN SELECT RAISE(ABORT, 'delete blocked'); END;",
        )
        .await
        .unwrap();

        assert!(matches!(
            h.admin.delete(seckill.id).await,
            Err(AppError::DatabaseError(_))
        ));
        assert!(h.inventory.snapshot(seckill.id).await.unwrap().is_some());
        assert_eq!(h.inventory.stock(seckill.id).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_sweep_advances_statuses() {
        let h = Harness::new().await;
        let (product_id, sku_id) = h.seed_product(50).await;
        let now = Utc::now();
        let running = h
            .seed_seckill(product_id, sku_id, 1, now - Duration::minutes(1), now + Duration::hours(1))
            .await;
        let finished = h
            .seed_seckill(product_id, sku_id, 1, now - Duration::hours(2), now - Duration::hours(1))
            .await;
        let upcoming = h
            .seed_seckill(product_id, sku_id, 1, now + Duration::hours(1), now + Duration::hours(2))
            .await;

        assert_eq!(h.admin.sweep_statuses(now).await.unwrap(), 2);

        let status_of = |id| {
            let db = h.db.clone();
            async move {
                seckill_products::Entity::find_by_id(id)
                    .one(&db)
                    .await
                    .unwrap()
                    .unwrap()
                    .status
            }
        };
        assert_eq!(status_of(running.id).await, SeckillStatus::Active);
        assert_eq!(status_of(finished.id).await, SeckillStatus::Ended);
        assert_eq!(status_of(upcoming.id).await, SeckillStatus::NotStarted);

        // 再次执行无变化
        assert_eq!(h.admin.sweep_statuses(now).await.unwrap(), 0);
    }
}
