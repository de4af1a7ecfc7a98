use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::services::{ExistenceFilter, InventoryCache, ReserveOutcome};
use crate::utils::OrderNumGenerator;
use chrono::{Duration, Utc};

#[derive(Clone)]
pub struct SeckillService {
    inventory: InventoryCache,
    filter: ExistenceFilter,
    order_nums: OrderNumGenerator,
    order_expire: Duration,
}

impl SeckillService {
    pub fn new(
        inventory: InventoryCache,
        filter: ExistenceFilter,
        order_nums: OrderNumGenerator,
        order_expire_minutes: i64,
    ) -> Self {
        Self {
            inventory,
            filter,
            order_nums,
            order_expire: Duration::minutes(order_expire_minutes),
        }
    }

    fn ensure_exists(&self, seckill_id: i64) -> AppResult<()> {
        if seckill_id <= 0 || !self.filter.might_contain(seckill_id) {
            return Err(AppError::NotFound("秒杀商品不存在".into()));
        }
        Ok(())
    }

    /// 未结束的秒杀商品列表（数据全部来自快速存储）
    pub async fn list(
        &self,
        params: &PaginationParams,
    ) -> AppResult<PaginatedResponse<SeckillListItem>> {
        let now_ts = Utc::now().timestamp();
        let (items, total) = self
            .inventory
            .list_active(now_ts, params.get_offset(), params.get_limit())
            .await?;
        let list = items
            .into_iter()
            .map(|(snapshot, stock)| SeckillListItem::from_snapshot(snapshot, stock, now_ts))
            .collect();
        Ok(PaginatedResponse::new(list, params, total))
    }

    pub async fn detail(&self, user_id: Option<i64>, seckill_id: i64) -> AppResult<SeckillDetail> {
        self.ensure_exists(seckill_id)?;
        let snapshot = self
            .inventory
            .snapshot(seckill_id)
            .await?
            .ok_or_else(|| AppError::NotFound("秒杀商品不存在或已结束".into()))?;
        let stock = self.inventory.stock(seckill_id).await?.unwrap_or(0);
        let has_purchased = match user_id {
            Some(uid) => self.inventory.has_purchased(seckill_id, uid).await?,
            None => false,
        };
        Ok(SeckillDetail::from_snapshot(
            snapshot,
            stock,
            has_purchased,
            Utc::now().timestamp(),
        ))
    }

    /// 秒杀下单：窗口校验后一次原子预占，写库由后台消费者完成
    pub async fn create_order(
        &self,
        user_id: i64,
        req: CreateSeckillOrderRequest,
    ) -> AppResult<CreateSeckillOrderResponse> {
        if req.address_id <= 0 {
            return Err(AppError::ValidationError("收货地址不能为空".into()));
        }
        self.ensure_exists(req.seckill_product_id)?;

        let snapshot = self
            .inventory
            .snapshot(req.seckill_product_id)
            .await?
            .ok_or_else(|| AppError::NotFound("秒杀商品不存在".into()))?;

        let now = Utc::now();
        if snapshot.phase_at(now.timestamp()) != SalePhase::InProgress {
            return Err(AppError::NotInSaleWindow);
        }

        let expire_time = now + self.order_expire;
        let now_ts = now.timestamp();
        let task = QueueTask {
            user_id,
            seckill_id: req.seckill_product_id,
            order_num: self.order_nums.next_order_num(),
            address_id: Some(req.address_id),
            timestamp: now_ts,
            deadline: expire_time.timestamp(),
            retry_count: 0,
            first_try_time: now_ts,
            last_try_time: 0,
            next_attempt_at: 0,
        };

        match self.inventory.reserve(task).await? {
            ReserveOutcome::Success(task) => {
                log::info!(
                    "Seckill reserved: order {} user {} seckill {}",
                    task.order_num,
                    user_id,
                    task.seckill_id
                );
                Ok(CreateSeckillOrderResponse {
                    order_num: task.order_num,
                    total_amount: snapshot.seckill_price,
                    expire_time,
                })
            }
            ReserveOutcome::Duplicate => Err(AppError::DuplicatePurchase),
            ReserveOutcome::SoldOut => Err(AppError::SoldOut),
            // 快照仍在但库存键已失效，按活动结束处理
            ReserveOutcome::NotFound => Err(AppError::NotInSaleWindow),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use chrono::Duration;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    fn order_req(seckill_id: i64) -> CreateSeckillOrderRequest {
        CreateSeckillOrderRequest {
            seckill_product_id: seckill_id,
            address_id: 1,
        }
    }

    /// 每个请求一个任务，在多线程运行时上同时放行
    async fn spawn_attempts(
        h: &Harness,
        seckill_id: i64,
        user_ids: Vec<i64>,
    ) -> Vec<AppResult<CreateSeckillOrderResponse>> {
        let barrier = Arc::new(Barrier::new(user_ids.len()));
        let handles: Vec<_> = user_ids
            .into_iter()
            .map(|uid| {
                let svc = h.seckill.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    svc.create_order(uid, order_req(seckill_id)).await
                })
            })
            .collect();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_buyers_never_oversell() {
        let h = Harness::new().await;
        let seckill_id = h.live_seckill(3).await.id;

        let results = spawn_attempts(&h, seckill_id, (1..=10).collect()).await;

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let sold_out = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::SoldOut)))
            .count();
        assert_eq!(ok, 3);
        assert_eq!(sold_out, 7);
        assert_eq!(h.inventory.stock(seckill_id).await.unwrap(), Some(0));
        assert_eq!(h.memory.queue_len(), 3);

        let mut order_nums: Vec<_> = results
            .into_iter()
            .filter_map(|r| r.ok().map(|resp| resp.order_num))
            .collect();
        order_nums.sort();
        order_nums.dedup();
        assert_eq!(order_nums.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_clicks_by_one_user_buy_once() {
        let h = Harness::new().await;
        let seckill_id = h.live_seckill(5).await.id;

        let results = spawn_attempts(&h, seckill_id, vec![42; 8]).await;

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let duplicate = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::DuplicatePurchase)))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(duplicate, 7);
        assert_eq!(h.inventory.stock(seckill_id).await.unwrap(), Some(4));
        assert_eq!(h.memory.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_second_attempt_is_duplicate() {
        let h = Harness::new().await;
        let seckill = h.live_seckill(5).await;

        let first = h.seckill.create_order(42, order_req(seckill.id)).await.unwrap();
        assert_eq!(first.total_amount, seckill.seckill_price);
        let second = h.seckill.create_order(42, order_req(seckill.id)).await;
        assert!(matches!(second, Err(AppError::DuplicatePurchase)));

        assert_eq!(h.inventory.stock(seckill.id).await.unwrap(), Some(4));
        assert_eq!(h.memory.queue_len(), 1);
        let deadline = h.memory.expiry_of(&first.order_num).unwrap();
        assert_eq!(deadline, first.expire_time.timestamp());
    }

    #[tokio::test]
    async fn test_order_outside_window_rejected() {
        let h = Harness::new().await;
        let (product_id, sku_id) = h.seed_product(20).await;
        let now = Utc::now();
        let upcoming = h
            .seed_seckill(
                product_id,
                sku_id,
                5,
                now + Duration::hours(1),
                now + Duration::hours(2),
            )
            .await;
        h.admin.preheat(upcoming.id).await.unwrap();

        let result = h.seckill.create_order(7, order_req(upcoming.id)).await;
        assert!(matches!(result, Err(AppError::NotInSaleWindow)));
        assert_eq!(h.inventory.stock(upcoming.id).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_unknown_or_unpreheated_product_not_found() {
        let h = Harness::new().await;
        let result = h.seckill.create_order(7, order_req(9_999)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        // 已建未预热：过滤器命中但快照缺失
        let (product_id, sku_id) = h.seed_product(20).await;
        let now = Utc::now();
        let cold = h
            .seed_seckill(product_id, sku_id, 5, now, now + Duration::hours(1))
            .await;
        let result = h.seckill.detail(None, cold.id).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_address_rejected() {
        let h = Harness::new().await;
        let seckill = h.live_seckill(1).await;
        let req = CreateSeckillOrderRequest {
            seckill_product_id: seckill.id,
            address_id: 0,
        };
        let result = h.seckill.create_order(1, req).await;
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_detail_reports_purchase_state() {
        let h = Harness::new().await;
        let seckill = h.live_seckill(2).await;
        h.seckill.create_order(5, order_req(seckill.id)).await.unwrap();

        let mine = h.seckill.detail(Some(5), seckill.id).await.unwrap();
        assert!(mine.has_purchased);
        assert!(!mine.can_buy);
        assert_eq!(mine.sold_num, 1);
        assert_eq!(mine.status, "进行中");

        let other = h.seckill.detail(Some(6), seckill.id).await.unwrap();
        assert!(!other.has_purchased);
        assert!(other.can_buy);

        let anonymous = h.seckill.detail(None, seckill.id).await.unwrap();
        assert!(!anonymous.has_purchased);
    }

    #[tokio::test]
    async fn test_list_pages_active_products() {
        let h = Harness::new().await;
        for _ in 0..15 {
            h.live_seckill(1).await;
        }
        // 已结束的商品不出现在列表中
        let (product_id, sku_id) = h.seed_product(5).await;
        let now = Utc::now();
        let ended = h
            .seed_seckill(
                product_id,
                sku_id,
                1,
                now - Duration::hours(2),
                now - Duration::minutes(1),
            )
            .await;
        h.admin.preheat(ended.id).await.unwrap();

        let page = h
            .seckill
            .list(&PaginationParams::new(Some(2), Some(10)))
            .await
            .unwrap();
        assert_eq!(page.total, 15);
        assert_eq!(page.list.len(), 5);
        assert!(page.list.iter().all(|item| item.id != ended.id));
        assert!(page.list.iter().all(|item| item.can_buy));
    }
}
