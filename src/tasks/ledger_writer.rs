//! Seckill ledger writer.
//!
//! Drains the reservation queue into the relational store. Failed tasks are parked in
//! a retry set with exponential backoff instead of blocking the consumer; after
//! `max_retries` attempts they move to the dead-letter list with their payload intact.

use crate::config::LedgerConfig;
use crate::entities::{
    OrderStatus, OrderType, SeckillOrderStatus, order_entity as orders,
    order_item_entity as order_items, product_entity as products, product_sku_entity as skus,
    seckill_order_entity as seckill_orders, seckill_product_entity as seckill_products,
};
use crate::error::{AppError, AppResult};
use crate::models::{DeadLetter, QueueTask, ts_to_datetime};
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use std::time::Duration;
use tokio::sync::watch;

const PROMOTE_BATCH: usize = 100;

/// 单次消费的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStep {
    /// 队列为空
    Idle,
    Persisted,
    /// 订单号已落库，重复投递直接确认
    Replayed,
    Retrying(u32),
    DeadLettered,
    Malformed,
}

#[derive(Clone)]
pub struct LedgerWriter {
    pool: DatabaseConnection,
    store: SharedStore,
    config: LedgerConfig,
}

impl LedgerWriter {
    pub fn new(pool: DatabaseConnection, store: SharedStore, config: LedgerConfig) -> Self {
        Self {
            pool,
            store,
            config,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!("Seckill ledger writer started");
        while !super::stopping(&shutdown) {
            if let Err(e) = self.run_once(Utc::now()).await {
                log::error!("Ledger writer iteration failed: {e}");
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
        log::info!("Seckill ledger writer stopped");
    }

    /// 提升到期重试、阻塞出队一次并处理
    pub async fn run_once(&self, now: DateTime<Utc>) -> AppResult<LedgerStep> {
        let promoted = self
            .store
            .promote_retries(now.timestamp_millis(), PROMOTE_BATCH)
            .await?;
        if promoted > 0 {
            log::debug!("Promoted {promoted} ledger retries");
        }

        let timeout = Duration::from_secs(self.config.pop_timeout_secs.max(1));
        match self.store.pop_task(timeout).await? {
            Some(payload) => self.process(payload, now).await,
            None => Ok(LedgerStep::Idle),
        }
    }

    pub async fn process(&self, payload: String, now: DateTime<Utc>) -> AppResult<LedgerStep> {
        let task: QueueTask = match serde_json::from_str(&payload) {
            Ok(task) => task,
            Err(e) => {
                log::error!("Malformed ledger payload moved to dead letters: {e}");
                self.store.push_dead_letter(&payload).await?;
                return Ok(LedgerStep::Malformed);
            }
        };

        match self.persist(&task, now).await {
            Ok(inserted) => {
                // 早于落库执行的关单扫描会丢弃截止时间，这里重新登记
                if let Err(e) = self
                    .store
                    .schedule_expiry(&task.order_num, task.deadline)
                    .await
                {
                    log::warn!("Failed to re-register expiry for {}: {e}", task.order_num);
                }
                if inserted {
                    log::info!("Seckill order {} persisted", task.order_num);
                    Ok(LedgerStep::Persisted)
                } else {
                    log::info!("Seckill order {} already persisted", task.order_num);
                    Ok(LedgerStep::Replayed)
                }
            }
            Err(e) => {
                // 乐观锁冲突重新读取后再试；校验、不存在、重复持有等错误重试也无法成功
                let retryable = e.is_transient() || matches!(e, AppError::VersionConflict(_));
                self.handle_failure(task, e.to_string(), retryable, now).await
            }
        }
    }

    /// 第 n 次失败后的退避：base * 2^(n-1)，封顶 max
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(16);
        let secs = self
            .config
            .base_delay_secs
            .saturating_mul(1u64 << exp)
            .min(self.config.max_delay_secs);
        Duration::from_secs(secs)
    }

    async fn handle_failure(
        &self,
        mut task: QueueTask,
        last_error: String,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> AppResult<LedgerStep> {
        let now_ts = now.timestamp();
        task.retry_count += 1;
        task.last_try_time = now_ts;
        if task.first_try_time == 0 {
            task.first_try_time = now_ts;
        }

        if !retryable || task.retry_count >= self.config.max_retries {
            log::error!(
                "Seckill order {} failed {} time(s), moving to dead letters: {last_error}",
                task.order_num,
                task.retry_count
            );
            let letter = DeadLetter {
                order_data: task,
                last_error,
                failed_at: now_ts,
            };
            self.store
                .push_dead_letter(&serde_json::to_string(&letter)?)
                .await?;
            return Ok(LedgerStep::DeadLettered);
        }

        let delay = self.backoff(task.retry_count);
        task.next_attempt_at = now.timestamp_millis() + delay.as_millis() as i64;
        log::warn!(
            "Seckill order {} persist failed (attempt {}), retrying in {}s: {last_error}",
            task.order_num,
            task.retry_count,
            delay.as_secs()
        );
        let retry_count = task.retry_count;
        let json = serde_json::to_string(&task)?;
        if let Err(e) = self.store.schedule_retry(&json, task.next_attempt_at).await {
            log::error!("Failed to schedule ledger retry, task payload: {json}");
            return Err(e.into());
        }
        Ok(LedgerStep::Retrying(retry_count))
    }

    /// 同一事务写入秒杀订单、主订单、明细并扣减持久库存；订单号已存在返回 false
    async fn persist(&self, task: &QueueTask, now: DateTime<Utc>) -> AppResult<bool> {
        let txn = self.pool.begin().await?;

        let existing = orders::Entity::find()
            .filter(orders::Column::OrderNum.eq(task.order_num.as_str()))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Ok(false);
        }

        let seckill = seckill_products::Entity::find_by_id(task.seckill_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("seckill product {}", task.seckill_id)))?;
        let sku = skus::Entity::find_by_id(seckill.sku_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("sku {}", seckill.sku_id)))?;
        let product = products::Entity::find_by_id(seckill.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("product {}", seckill.product_id)))?;

        // 唯一索引 (user_id, seckill_product_id)：已取消的旧记录复用，其余视为重复
        let previous = seckill_orders::Entity::find()
            .filter(seckill_orders::Column::UserId.eq(task.user_id))
            .filter(seckill_orders::Column::SeckillProductId.eq(task.seckill_id))
            .one(&txn)
            .await?;
        match previous {
            Some(prev) if prev.status == SeckillOrderStatus::Cancelled => {
                let result = seckill_orders::Entity::update_many()
                    .col_expr(seckill_orders::Column::OrderNum, Expr::value(task.order_num.as_str()))
                    .col_expr(seckill_orders::Column::Money, Expr::value(seckill.seckill_price))
                    .col_expr(
                        seckill_orders::Column::Status,
                        Expr::value(SeckillOrderStatus::Pending),
                    )
                    .col_expr(
                        seckill_orders::Column::Version,
                        Expr::col(seckill_orders::Column::Version).add(1),
                    )
                    .col_expr(seckill_orders::Column::UpdatedAt, Expr::value(now))
                    .filter(seckill_orders::Column::Id.eq(prev.id))
                    .filter(seckill_orders::Column::Version.eq(prev.version))
                    .exec(&txn)
                    .await?;
                if result.rows_affected == 0 {
                    return Err(AppError::VersionConflict(format!("seckill order {}", prev.id)));
                }
            }
            Some(prev) => {
                return Err(AppError::FatalPersistence(format!(
                    "user {} already holds seckill order {} for product {}",
                    task.user_id, prev.order_num, task.seckill_id
                )));
            }
            None => {
                seckill_orders::ActiveModel {
                    user_id: Set(task.user_id),
                    seckill_product_id: Set(task.seckill_id),
                    sku_id: Set(seckill.sku_id),
                    money: Set(seckill.seckill_price),
                    order_num: Set(task.order_num.clone()),
                    status: Set(SeckillOrderStatus::Pending),
                    version: Set(0),
                    created_at: Set(Some(now)),
                    updated_at: Set(Some(now)),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }
        }

        orders::ActiveModel {
            user_id: Set(task.user_id),
            order_num: Set(task.order_num.clone()),
            all_price: Set(seckill.seckill_price),
            order_status: Set(OrderStatus::Pending),
            order_type: Set(OrderType::Seckill),
            address_id: Set(task.address_id),
            remark: Set(String::new()),
            expire_time: Set(ts_to_datetime(task.deadline)),
            version: Set(0),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        order_items::ActiveModel {
            order_num: Set(task.order_num.clone()),
            product_id: Set(product.id),
            product_sku_id: Set(sku.id),
            num: Set(1),
            price: Set(seckill.seckill_price),
            title: Set(format!("{} - {}", product.name, sku.title)),
            img_path: Set(product.img_path),
            created_at: Set(Some(now)),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let result = seckill_products::Entity::update_many()
            .col_expr(
                seckill_products::Column::Stock,
                Expr::col(seckill_products::Column::Stock).sub(1),
            )
            .col_expr(seckill_products::Column::UpdatedAt, Expr::value(now))
            .filter(seckill_products::Column::Id.eq(seckill.id))
            .filter(seckill_products::Column::Stock.gt(0))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::FatalPersistence(format!(
                "durable stock exhausted for seckill product {}",
                seckill.id
            )));
        }

        txn.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateSeckillOrderRequest, DeadLetterResponse, PaginationParams};
    use crate::test_support::Harness;
    use chrono::Duration as ChronoDuration;
    use sea_orm::{ConnectionTrait, PaginatorTrait};

    fn orphan_task(order_num: &str) -> QueueTask {
        let now = Utc::now().timestamp();
        QueueTask {
            user_id: 9,
            seckill_id: 424_242,
            order_num: order_num.to_string(),
            address_id: Some(1),
            timestamp: now,
            deadline: now + 1800,
            retry_count: 0,
            first_try_time: now,
            last_try_time: 0,
            next_attempt_at: 0,
        }
    }

    #[tokio::test]
    async fn test_reserved_order_is_persisted() {
        let h = Harness::new().await;
        let seckill = h.live_seckill(2).await;
        let resp = h
            .seckill
            .create_order(
                11,
                CreateSeckillOrderRequest {
                    seckill_product_id: seckill.id,
                    address_id: 3,
                },
            )
            .await
            .unwrap();

        let step = h.ledger.run_once(Utc::now()).await.unwrap();
        assert_eq!(step, LedgerStep::Persisted);

        let order = orders::Entity::find()
            .filter(orders::Column::OrderNum.eq(resp.order_num.as_str()))
            .one(&h.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.order_type, OrderType::Seckill);
        assert_eq!(order.order_status, OrderStatus::Pending);
        assert_eq!(order.all_price, seckill.seckill_price);
        assert_eq!(order.address_id, Some(3));
        assert_eq!(order.expire_time.timestamp(), resp.expire_time.timestamp());

        let items = order_items::Entity::find()
            .filter(order_items::Column::OrderNum.eq(resp.order_num.as_str()))
            .all(&h.db)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Phone - Black");

        let durable = seckill_products::Entity::find_by_id(seckill.id)
            .one(&h.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(durable.stock, 1);
        assert_eq!(
            h.memory.expiry_of(&resp.order_num),
            Some(resp.expire_time.timestamp())
        );
    }

    #[tokio::test]
    async fn test_redelivered_task_is_acknowledged() {
        let h = Harness::new().await;
        let seckill = h.live_seckill(2).await;
        h.seckill
            .create_order(
                12,
                CreateSeckillOrderRequest {
                    seckill_product_id: seckill.id,
                    address_id: 1,
                },
            )
            .await
            .unwrap();

        // 出队前复制一份载荷，模拟重复投递
        let payload = h
            .store
            .pop_task(std::time::Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            h.ledger.process(payload.clone(), Utc::now()).await.unwrap(),
            LedgerStep::Persisted
        );
        assert_eq!(
            h.ledger.process(payload, Utc::now()).await.unwrap(),
            LedgerStep::Replayed
        );

        let count = seckill_orders::Entity::find().count(&h.db).await.unwrap();
        assert_eq!(count, 1);
        let durable = seckill_products::Entity::find_by_id(seckill.id)
            .one(&h.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(durable.stock, 1);
    }

    /// 抢购一单，并让明细表写入失败
    async fn reserve_with_broken_ledger(h: &Harness) -> String {
        let seckill = h.live_seckill(2).await;
        let resp = h
            .seckill
            .create_order(
                13,
                CreateSeckillOrderRequest {
                    seckill_product_id: seckill.id,
                    address_id: 1,
                },
            )
            .await
            .unwrap();
        h.db.execute_unprepared("DROP TABLE order_items").await.unwrap();
        resp.order_num
    }

    #[tokio::test]
    async fn test_persistent_failure_ends_in_dead_letters() {
        let h = Harness::new().await;
        let order_num = reserve_with_broken_ledger(&h).await;

        let start = Utc::now();
        for attempt in 1..=4u32 {
            let now = start + ChronoDuration::hours(i64::from(attempt - 1));
            let step = h.ledger.run_once(now).await.unwrap();
            assert_eq!(step, LedgerStep::Retrying(attempt));
            assert_eq!(h.memory.retry_len(), 1);
            assert_eq!(h.memory.queue_len(), 0);
        }

        let step = h
            .ledger
            .run_once(start + ChronoDuration::hours(4))
            .await
            .unwrap();
        assert_eq!(step, LedgerStep::DeadLettered);
        assert_eq!(h.memory.retry_len(), 0);

        let letters = h
            .admin
            .dead_letters(&PaginationParams::default())
            .await
            .unwrap();
        assert_eq!(letters.total, 1);
        let letter = &letters.list[0];
        let data = letter.order_data.as_ref().unwrap();
        assert_eq!(data.order_num, order_num);
        assert_eq!(data.user_id, 13);
        assert_eq!(data.retry_count, 5);
        assert!(letter.last_error.as_deref().unwrap().contains("order_items"));

        // 事务回滚，没有留下部分数据
        let count = orders::Entity::find().count(&h.db).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_missing_product_goes_straight_to_dead_letters() {
        let h = Harness::new().await;
        let task = orphan_task("900000000000000001");
        h.store
            .push_task(&serde_json::to_string(&task).unwrap())
            .await
            .unwrap();

        let step = h.ledger.run_once(Utc::now()).await.unwrap();
        assert_eq!(step, LedgerStep::DeadLettered);
        assert_eq!(h.memory.retry_len(), 0);

        let letters = h
            .admin
            .dead_letters(&PaginationParams::default())
            .await
            .unwrap();
        assert_eq!(letters.total, 1);
        let letter = &letters.list[0];
        assert_eq!(letter.order_data.as_ref().unwrap().retry_count, 1);
        assert!(letter.last_error.as_deref().unwrap().contains("424242"));
    }

    #[tokio::test]
    async fn test_retry_waits_for_backoff() {
        let h = Harness::new().await;
        reserve_with_broken_ledger(&h).await;

        let now = Utc::now();
        assert_eq!(h.ledger.run_once(now).await.unwrap(), LedgerStep::Retrying(1));
        // 退避 2 秒内不会被重新投递
        assert_eq!(h.ledger.run_once(now).await.unwrap(), LedgerStep::Idle);
        assert_eq!(h.memory.retry_len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_kept_verbatim() {
        let h = Harness::new().await;
        let step = h
            .ledger
            .process("{not json".to_string(), Utc::now())
            .await
            .unwrap();
        assert_eq!(step, LedgerStep::Malformed);

        let raw = h.store.dead_letters(0, 10).await.unwrap();
        assert_eq!(raw, vec!["{not json".to_string()]);
        assert_eq!(
            DeadLetterResponse::parse(raw[0].clone()).raw.as_deref(),
            Some("{not json")
        );
    }

    #[tokio::test]
    async fn test_backoff_doubles_and_caps() {
        let h = Harness::new().await;
        let secs: Vec<u64> = (1..=6).map(|n| h.ledger.backoff(n).as_secs()).collect();
        assert_eq!(secs, vec![2, 4, 8, 16, 32, 32]);
    }
}
