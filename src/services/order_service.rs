use crate::entities::{
    OrderStatus, OrderType, SeckillOrderStatus, order_entity as orders,
    order_item_entity as order_items, product_entity as products, product_sku_entity as skus,
    seckill_order_entity as seckill_orders, seckill_product_entity as seckill_products,
};
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::services::InventoryCache;
use crate::store::SharedStore;
use crate::utils::OrderNumGenerator;
use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::{HashMap, HashSet};

/// 关单结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// 已支付或已取消，无需处理
    AlreadyTerminal,
    /// 订单尚未落库或已被删除
    Missing,
}

#[derive(Clone)]
pub struct OrderService {
    pool: DatabaseConnection,
    store: SharedStore,
    inventory: InventoryCache,
    order_nums: OrderNumGenerator,
    order_expire: Duration,
}

impl OrderService {
    pub fn new(
        pool: DatabaseConnection,
        store: SharedStore,
        inventory: InventoryCache,
        order_nums: OrderNumGenerator,
        order_expire_minutes: i64,
    ) -> Self {
        Self {
            pool,
            store,
            inventory,
            order_nums,
            order_expire: Duration::minutes(order_expire_minutes),
        }
    }

    async fn find_by_order_num(&self, order_num: &str) -> AppResult<Option<orders::Model>> {
        Ok(orders::Entity::find()
            .filter(orders::Column::OrderNum.eq(order_num))
            .one(&self.pool)
            .await?)
    }

    /// 普通下单：乐观锁扣减 SKU 库存，订单与明细同一事务写入
    pub async fn create_order(
        &self,
        user_id: i64,
        req: CreateOrderRequest,
    ) -> AppResult<CreateOrderResponse> {
        if req.items.is_empty() {
            return Err(AppError::ValidationError("订单商品不能为空".into()));
        }
        if req.address_id <= 0 {
            return Err(AppError::ValidationError("收货地址不能为空".into()));
        }
        let mut seen = HashSet::new();
        for item in &req.items {
            if item.num <= 0 {
                return Err(AppError::ValidationError("购买数量必须大于 0".into()));
            }
            if !seen.insert(item.sku_id) {
                return Err(AppError::ValidationError("订单中存在重复的 SKU".into()));
            }
        }

        let sku_ids: Vec<i64> = req.items.iter().map(|i| i.sku_id).collect();
        let sku_map: HashMap<i64, skus::Model> = skus::Entity::find()
            .filter(skus::Column::Id.is_in(sku_ids))
            .all(&self.pool)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();
        let product_ids: Vec<i64> = sku_map.values().map(|s| s.product_id).collect();
        let product_map: HashMap<i64, products::Model> = products::Entity::find()
            .filter(products::Column::Id.is_in(product_ids))
            .all(&self.pool)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut lines = Vec::with_capacity(req.items.len());
        let mut total_amount = 0i64;
        for item in &req.items {
            let sku = sku_map
                .get(&item.sku_id)
                .ok_or_else(|| AppError::NotFound(format!("SKU {} 不存在", item.sku_id)))?;
            let product = product_map
                .get(&sku.product_id)
                .ok_or_else(|| AppError::NotFound("商品不存在".into()))?;
            if sku.stock < i64::from(item.num) {
                return Err(AppError::SoldOut);
            }
            total_amount += sku.price * i64::from(item.num);
            lines.push((sku, product, item.num));
        }

        let now = Utc::now();
        let expire_time = now + self.order_expire;
        let order_num = self.order_nums.next_order_num();

        let txn = self.pool.begin().await?;
        for (sku, _, num) in &lines {
            let result = skus::Entity::update_many()
                .col_expr(
                    skus::Column::Stock,
                    Expr::col(skus::Column::Stock).sub(i64::from(*num)),
                )
                .col_expr(skus::Column::Version, Expr::col(skus::Column::Version).add(1))
                .col_expr(skus::Column::UpdatedAt, Expr::value(now))
                .filter(skus::Column::Id.eq(sku.id))
                .filter(skus::Column::Version.eq(sku.version))
                .filter(skus::Column::Stock.gte(i64::from(*num)))
                .exec(&txn)
                .await?;
            if result.rows_affected == 0 {
                return Err(AppError::VersionConflict(format!("sku {}", sku.id)));
            }
        }

        orders::ActiveModel {
            user_id: Set(user_id),
            order_num: Set(order_num.clone()),
            all_price: Set(total_amount),
            order_status: Set(OrderStatus::Pending),
            order_type: Set(OrderType::Normal),
            address_id: Set(Some(req.address_id)),
            remark: Set(req.remark.unwrap_or_default()),
            expire_time: Set(expire_time),
            version: Set(0),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        for (sku, product, num) in &lines {
            order_items::ActiveModel {
                order_num: Set(order_num.clone()),
                product_id: Set(product.id),
                product_sku_id: Set(sku.id),
                num: Set(*num),
                price: Set(sku.price),
                title: Set(format!("{} - {}", product.name, sku.title)),
                img_path: Set(product.img_path.clone()),
                created_at: Set(Some(now)),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;

        if let Err(e) = self
            .store
            .schedule_expiry(&order_num, expire_time.timestamp())
            .await
        {
            log::error!("Failed to register expiry for order {order_num}: {e}");
        }

        Ok(CreateOrderResponse {
            order_num,
            total_amount,
            expire_time,
        })
    }

    /// 模拟支付：待支付且未过期的订单版本号校验后置为已支付
    pub async fn pay_order(&self, user_id: i64, order_num: &str) -> AppResult<PayOrderResponse> {
        let order = self
            .find_by_order_num(order_num)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| AppError::NotFound("订单不存在".into()))?;
        if !order.order_status.is_pending() {
            return Err(AppError::ValidationError(format!(
                "订单状态为 {}，无法支付",
                order.order_status
            )));
        }
        let now = Utc::now();
        if now >= order.expire_time {
            return Err(AppError::ValidationError("订单已超时".into()));
        }

        let txn = self.pool.begin().await?;
        let result = orders::Entity::update_many()
            .col_expr(orders::Column::OrderStatus, Expr::value(OrderStatus::Paid))
            .col_expr(orders::Column::PayTime, Expr::value(now))
            .col_expr(orders::Column::Version, Expr::col(orders::Column::Version).add(1))
            .col_expr(orders::Column::UpdatedAt, Expr::value(now))
            .filter(orders::Column::Id.eq(order.id))
            .filter(orders::Column::Version.eq(order.version))
            .filter(orders::Column::OrderStatus.eq(OrderStatus::Pending))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::VersionConflict(format!("order {order_num}")));
        }
        if order.order_type == OrderType::Seckill {
            let result = seckill_orders::Entity::update_many()
                .col_expr(
                    seckill_orders::Column::Status,
                    Expr::value(SeckillOrderStatus::Paid),
                )
                .col_expr(
                    seckill_orders::Column::Version,
                    Expr::col(seckill_orders::Column::Version).add(1),
                )
                .col_expr(seckill_orders::Column::UpdatedAt, Expr::value(now))
                .filter(seckill_orders::Column::OrderNum.eq(order_num))
                .filter(seckill_orders::Column::Status.eq(SeckillOrderStatus::Pending))
                .exec(&txn)
                .await?;
            if result.rows_affected == 0 {
                return Err(AppError::VersionConflict(format!("seckill order {order_num}")));
            }
        }
        txn.commit().await?;

        if let Err(e) = self.store.remove_expiry(order_num).await {
            log::warn!("Failed to remove expiry entry for paid order {order_num}: {e}");
        }
        log::info!("Order {order_num} paid by user {user_id}");

        Ok(PayOrderResponse {
            order_num: order_num.to_string(),
            pay_time: now,
        })
    }

    pub async fn list_orders(
        &self,
        user_id: i64,
        query: &OrderQuery,
    ) -> AppResult<PaginatedResponse<OrderResponse>> {
        let params = PaginationParams::new(query.page, query.page_size);

        let mut base = orders::Entity::find().filter(orders::Column::UserId.eq(user_id));
        if let Some(status) = query.status {
            base = base.filter(orders::Column::OrderStatus.eq(status));
        }
        let total = base.clone().count(&self.pool).await?;
        let page = base
            .order_by_desc(orders::Column::Id)
            .limit(params.get_limit())
            .offset(params.get_offset())
            .all(&self.pool)
            .await?;

        let order_nums: Vec<String> = page.iter().map(|o| o.order_num.clone()).collect();
        let mut items_by_order: HashMap<String, Vec<order_items::Model>> = HashMap::new();
        if !order_nums.is_empty() {
            for item in order_items::Entity::find()
                .filter(order_items::Column::OrderNum.is_in(order_nums))
                .order_by_asc(order_items::Column::Id)
                .all(&self.pool)
                .await?
            {
                items_by_order
                    .entry(item.order_num.clone())
                    .or_default()
                    .push(item);
            }
        }

        let list = page
            .into_iter()
            .map(|o| {
                let items = items_by_order.remove(&o.order_num).unwrap_or_default();
                OrderResponse::from_parts(o, items)
            })
            .collect();
        Ok(PaginatedResponse::new(list, &params, total))
    }

    /// 关闭超时未支付订单（普通与秒杀统一入口），可重复调用
    pub async fn close_expired(&self, order_num: &str, now: DateTime<Utc>) -> AppResult<CloseOutcome> {
        let Some(order) = self.find_by_order_num(order_num).await? else {
            return Ok(CloseOutcome::Missing);
        };
        match order.order_type {
            OrderType::Normal => self.close_normal(order, now).await,
            OrderType::Seckill => self.close_seckill(order, now).await,
        }
    }

    async fn cancel_order_row(
        txn: &DatabaseTransaction,
        order: &orders::Model,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = orders::Entity::update_many()
            .col_expr(
                orders::Column::OrderStatus,
                Expr::value(OrderStatus::Cancelled),
            )
            .col_expr(orders::Column::CancelTime, Expr::value(now))
            .col_expr(orders::Column::Version, Expr::col(orders::Column::Version).add(1))
            .col_expr(orders::Column::UpdatedAt, Expr::value(now))
            .filter(orders::Column::Id.eq(order.id))
            .filter(orders::Column::Version.eq(order.version))
            .filter(orders::Column::OrderStatus.eq(OrderStatus::Pending))
            .exec(txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::VersionConflict(format!("order {}", order.order_num)));
        }
        Ok(())
    }

    /// 版本冲突后重读：返回已进入的终态，订单消失返回 None，仍待支付则原样报错
    async fn settled_status(&self, order_num: &str, err: AppError) -> AppResult<Option<OrderStatus>> {
        match self.find_by_order_num(order_num).await? {
            Some(latest) if !latest.order_status.is_pending() => {
                log::info!(
                    "Order {order_num} reached {} concurrently, skipping close",
                    latest.order_status
                );
                Ok(Some(latest.order_status))
            }
            Some(_) => Err(err),
            None => Ok(None),
        }
    }

    async fn close_normal(&self, order: orders::Model, now: DateTime<Utc>) -> AppResult<CloseOutcome> {
        if !order.order_status.is_pending() {
            return Ok(CloseOutcome::AlreadyTerminal);
        }
        let items = order_items::Entity::find()
            .filter(order_items::Column::OrderNum.eq(order.order_num.as_str()))
            .all(&self.pool)
            .await?;

        let txn = self.pool.begin().await?;
        if let Err(err) = Self::cancel_order_row(&txn, &order, now).await {
            txn.rollback().await?;
            return match err {
                AppError::VersionConflict(_) => Ok(
                    match self.settled_status(&order.order_num, err).await? {
                        Some(_) => CloseOutcome::AlreadyTerminal,
                        None => CloseOutcome::Missing,
                    },
                ),
                other => Err(other),
            };
        }
        for item in &items {
            skus::Entity::update_many()
                .col_expr(
                    skus::Column::Stock,
                    Expr::col(skus::Column::Stock).add(i64::from(item.num)),
                )
                .col_expr(skus::Column::Version, Expr::col(skus::Column::Version).add(1))
                .col_expr(skus::Column::UpdatedAt, Expr::value(now))
                .filter(skus::Column::Id.eq(item.product_sku_id))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;

        log::info!("Normal order {} closed, {} sku(s) restocked", order.order_num, items.len());
        Ok(CloseOutcome::Closed)
    }

    async fn close_seckill(&self, order: orders::Model, now: DateTime<Utc>) -> AppResult<CloseOutcome> {
        // 唯一行可能已被同一用户的新订单复用，按订单号查不到即说明本订单早已结束
        let seckill_order = seckill_orders::Entity::find()
            .filter(seckill_orders::Column::OrderNum.eq(order.order_num.as_str()))
            .one(&self.pool)
            .await?;

        let seckill_order = match (order.order_status, seckill_order) {
            (OrderStatus::Pending, Some(row)) => row,
            (OrderStatus::Pending, None) => {
                return Err(AppError::InternalError(format!(
                    "seckill order row missing for {}",
                    order.order_num
                )));
            }
            (OrderStatus::Cancelled, Some(row)) => {
                // 取消已提交但回补可能未执行，标记仍属于本订单时补做
                if self
                    .inventory
                    .credit_back(row.seckill_product_id, row.user_id, &order.order_num)
                    .await?
                {
                    log::warn!("Completed pending credit-back for order {}", order.order_num);
                }
                return Ok(CloseOutcome::AlreadyTerminal);
            }
            _ => return Ok(CloseOutcome::AlreadyTerminal),
        };

        let txn = self.pool.begin().await?;
        let cancelled = self
            .cancel_seckill_rows(&txn, &order, &seckill_order, now)
            .await;
        if let Err(err) = cancelled {
            txn.rollback().await?;
            return match err {
                AppError::VersionConflict(_) => {
                    match self.settled_status(&order.order_num, err).await? {
                        Some(OrderStatus::Cancelled) => {
                            self.inventory
                                .credit_back(
                                    seckill_order.seckill_product_id,
                                    seckill_order.user_id,
                                    &order.order_num,
                                )
                                .await?;
                            Ok(CloseOutcome::AlreadyTerminal)
                        }
                        Some(_) => Ok(CloseOutcome::AlreadyTerminal),
                        None => Ok(CloseOutcome::Missing),
                    }
                }
                other => Err(other),
            };
        }
        txn.commit().await?;

        self.inventory
            .credit_back(
                seckill_order.seckill_product_id,
                seckill_order.user_id,
                &order.order_num,
            )
            .await?;
        log::info!(
            "Seckill order {} closed, stock credited back to seckill {}",
            order.order_num,
            seckill_order.seckill_product_id
        );
        Ok(CloseOutcome::Closed)
    }

    async fn cancel_seckill_rows(
        &self,
        txn: &DatabaseTransaction,
        order: &orders::Model,
        seckill_order: &seckill_orders::Model,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        Self::cancel_order_row(txn, order, now).await?;

        let result = seckill_orders::Entity::update_many()
            .col_expr(
                seckill_orders::Column::Status,
                Expr::value(SeckillOrderStatus::Cancelled),
            )
            .col_expr(
                seckill_orders::Column::Version,
                Expr::col(seckill_orders::Column::Version).add(1),
            )
            .col_expr(seckill_orders::Column::UpdatedAt, Expr::value(now))
            .filter(seckill_orders::Column::Id.eq(seckill_order.id))
            .filter(seckill_orders::Column::Version.eq(seckill_order.version))
            .filter(seckill_orders::Column::Status.eq(SeckillOrderStatus::Pending))
            .exec(txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::VersionConflict(format!(
                "seckill order {}",
                order.order_num
            )));
        }

        seckill_products::Entity::update_many()
            .col_expr(
                seckill_products::Column::Stock,
                Expr::col(seckill_products::Column::Stock).add(1),
            )
            .col_expr(seckill_products::Column::UpdatedAt, Expr::value(now))
            .filter(seckill_products::Column::Id.eq(seckill_order.seckill_product_id))
            .exec(txn)
            .await?;
        Ok(())
    }
}
