use crate::entities::{SeckillStatus, seckill_product_entity};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 预热到快速存储的秒杀商品快照（时间为秒级时间戳）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeckillSnapshot {
    pub seckill_id: i64,
    pub product_id: i64,
    pub product_name: String,
    #[serde(rename = "title")]
    pub product_title: String,
    #[serde(rename = "info")]
    pub product_info: String,
    #[serde(rename = "img")]
    pub product_img: String,
    pub sku_id: i64,
    pub sku_title: String,
    pub sku_code: String,
    pub original_price: i64,
    pub seckill_price: i64,
    /// 活动总库存，用于计算已售
    pub seckill_stock: i64,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalePhase {
    NotStarted,
    InProgress,
    Ended,
}

impl SalePhase {
    pub fn label(&self) -> &'static str {
        match self {
            SalePhase::NotStarted => "未开始",
            SalePhase::InProgress => "进行中",
            SalePhase::Ended => "已结束",
        }
    }
}

impl SeckillSnapshot {
    /// 售卖窗口为 [start_time, end_time)
    pub fn phase_at(&self, now_ts: i64) -> SalePhase {
        if now_ts < self.start_time {
            SalePhase::NotStarted
        } else if now_ts < self.end_time {
            SalePhase::InProgress
        } else {
            SalePhase::Ended
        }
    }

    pub fn sold_num(&self, live_stock: i64) -> i64 {
        (self.seckill_stock - live_stock).max(0)
    }
}

/// 写库队列中的任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct QueueTask {
    pub user_id: i64,
    pub seckill_id: i64,
    pub order_num: String,
    #[serde(default)]
    pub address_id: Option<i64>,
    /// 下单时间（秒）
    pub timestamp: i64,
    /// 支付截止时间（秒）
    pub deadline: i64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub first_try_time: i64,
    #[serde(default)]
    pub last_try_time: i64,
    /// 下次允许重试的时间（毫秒）
    #[serde(default)]
    pub next_attempt_at: i64,
}

/// 死信数据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct DeadLetter {
    pub order_data: QueueTask,
    pub last_error: String,
    pub failed_at: i64,
}

/// 死信列表项：无法解析的原始载荷原样放在 `raw` 中
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeadLetterResponse {
    pub order_data: Option<QueueTask>,
    pub last_error: Option<String>,
    pub failed_at: Option<i64>,
    pub raw: Option<String>,
}

impl DeadLetterResponse {
    pub fn parse(payload: String) -> Self {
        match serde_json::from_str::<DeadLetter>(&payload) {
            Ok(letter) => Self {
                order_data: Some(letter.order_data),
                last_error: Some(letter.last_error),
                failed_at: Some(letter.failed_at),
                raw: None,
            },
            Err(_) => Self {
                order_data: None,
                last_error: None,
                failed_at: None,
                raw: Some(payload),
            },
        }
    }
}

pub fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SeckillListItem {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub img_path: String,
    pub original_price: i64,
    pub seckill_price: i64,
    /// 实时剩余库存
    pub stock: i64,
    pub seckill_stock: i64,
    pub sold_num: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
    pub is_sold_out: bool,
    pub can_buy: bool,
}

impl SeckillListItem {
    pub fn from_snapshot(snapshot: SeckillSnapshot, stock: i64, now_ts: i64) -> Self {
        let phase = snapshot.phase_at(now_ts);
        let is_sold_out = stock <= 0;
        Self {
            id: snapshot.seckill_id,
            product_id: snapshot.product_id,
            sold_num: snapshot.sold_num(stock),
            product_name: snapshot.product_name,
            img_path: snapshot.product_img,
            original_price: snapshot.original_price,
            seckill_price: snapshot.seckill_price,
            stock,
            seckill_stock: snapshot.seckill_stock,
            start_time: ts_to_datetime(snapshot.start_time),
            end_time: ts_to_datetime(snapshot.end_time),
            status: phase.label().to_string(),
            is_sold_out,
            can_buy: phase == SalePhase::InProgress && !is_sold_out,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SeckillDetail {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub product_title: String,
    pub product_info: String,
    pub img_path: String,
    pub sku_id: i64,
    pub sku_title: String,
    pub sku_code: String,
    pub original_price: i64,
    pub seckill_price: i64,
    pub stock: i64,
    pub seckill_stock: i64,
    pub sold_num: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
    pub is_sold_out: bool,
    pub can_buy: bool,
    pub has_purchased: bool,
}

impl SeckillDetail {
    pub fn from_snapshot(
        snapshot: SeckillSnapshot,
        stock: i64,
        has_purchased: bool,
        now_ts: i64,
    ) -> Self {
        let phase = snapshot.phase_at(now_ts);
        let is_sold_out = stock <= 0;
        Self {
            id: snapshot.seckill_id,
            product_id: snapshot.product_id,
            sold_num: snapshot.sold_num(stock),
            product_name: snapshot.product_name,
            product_title: snapshot.product_title,
            product_info: snapshot.product_info,
            img_path: snapshot.product_img,
            sku_id: snapshot.sku_id,
            sku_title: snapshot.sku_title,
            sku_code: snapshot.sku_code,
            original_price: snapshot.original_price,
            seckill_price: snapshot.seckill_price,
            stock,
            seckill_stock: snapshot.seckill_stock,
            start_time: ts_to_datetime(snapshot.start_time),
            end_time: ts_to_datetime(snapshot.end_time),
            status: phase.label().to_string(),
            is_sold_out,
            can_buy: phase == SalePhase::InProgress && !is_sold_out && !has_purchased,
            has_purchased,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateSeckillOrderRequest {
    pub seckill_product_id: i64,
    pub address_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateSeckillOrderResponse {
    pub order_num: String,
    pub total_amount: i64,
    pub expire_time: DateTime<Utc>,
}

// ---------- 管理端 ----------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateSeckillProductRequest {
    pub product_id: i64,
    pub sku_id: i64,
    /// 秒杀价（分）
    pub seckill_price: i64,
    pub seckill_stock: i64,
    #[serde(default)]
    pub limit_per_user: Option<i32>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateSeckillStatusRequest {
    pub status: SeckillStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SeckillProductResponse {
    pub id: i64,
    pub product_id: i64,
    pub sku_id: i64,
    pub seckill_price: i64,
    pub seckill_stock: i64,
    pub stock: i64,
    pub limit_per_user: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SeckillStatus,
    pub version: i32,
}

impl From<seckill_product_entity::Model> for SeckillProductResponse {
    fn from(m: seckill_product_entity::Model) -> Self {
        Self {
            id: m.id,
            product_id: m.product_id,
            sku_id: m.sku_id,
            seckill_price: m.seckill_price,
            seckill_stock: m.seckill_stock,
            stock: m.stock,
            limit_per_user: m.limit_per_user,
            start_time: m.start_time,
            end_time: m.end_time,
            status: m.status,
            version: m.version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PreheatResponse {
    pub seckill_id: i64,
    pub stock: i64,
    pub expire_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SeckillSnapshot {
        SeckillSnapshot {
            seckill_id: 1,
            product_id: 2,
            product_name: "Phone".into(),
            product_title: "Flagship".into(),
            product_info: String::new(),
            product_img: "/img/p.png".into(),
            sku_id: 3,
            sku_title: "8G+256G".into(),
            sku_code: "P-8-256".into(),
            original_price: 399_900,
            seckill_price: 99_900,
            seckill_stock: 10,
            start_time: 1_000,
            end_time: 2_000,
        }
    }

    #[test]
    fn test_sale_window_is_half_open() {
        let s = snapshot();
        assert_eq!(s.phase_at(999), SalePhase::NotStarted);
        assert_eq!(s.phase_at(1_000), SalePhase::InProgress);
        assert_eq!(s.phase_at(2_000), SalePhase::Ended);
    }

    #[test]
    fn test_snapshot_json_field_names() {
        let value = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(value["title"], "Flagship");
        assert_eq!(value["img"], "/img/p.png");
        let back: SeckillSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot());
    }

    #[test]
    fn test_detail_cannot_buy_after_purchase() {
        let detail = SeckillDetail::from_snapshot(snapshot(), 4, true, 1_500);
        assert_eq!(detail.sold_num, 6);
        assert_eq!(detail.status, "进行中");
        assert!(!detail.can_buy);

        let item = SeckillListItem::from_snapshot(snapshot(), 0, 1_500);
        assert!(item.is_sold_out);
        assert!(!item.can_buy);
    }

    #[test]
    fn test_queue_task_defaults_retry_fields() {
        let raw = r#"{"user_id":1,"seckill_id":2,"order_num":"9","timestamp":10,"deadline":20}"#;
        let task: QueueTask = serde_json::from_str(raw).unwrap();
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.address_id, None);
    }

    #[test]
    fn test_malformed_dead_letter_kept_raw() {
        let entry = DeadLetterResponse::parse("not-json".into());
        assert_eq!(entry.raw.as_deref(), Some("not-json"));
        assert!(entry.order_data.is_none());
    }
}
