use crate::entities::{OrderStatus, OrderType, order_entity, order_item_entity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemRequest {
    pub sku_id: i64,
    pub num: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemRequest>,
    pub address_id: i64,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderResponse {
    pub order_num: String,
    pub total_amount: i64,
    pub expire_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: i64,
    pub product_sku_id: i64,
    pub num: i32,
    pub price: i64,
    pub title: String,
    pub img_path: String,
}

impl From<order_item_entity::Model> for OrderItemResponse {
    fn from(m: order_item_entity::Model) -> Self {
        Self {
            product_id: m.product_id,
            product_sku_id: m.product_sku_id,
            num: m.num,
            price: m.price,
            title: m.title,
            img_path: m.img_path,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub order_num: String,
    pub all_price: i64,
    pub order_status: OrderStatus,
    pub order_type: OrderType,
    pub address_id: Option<i64>,
    pub remark: String,
    pub expire_time: DateTime<Utc>,
    pub pay_time: Option<DateTime<Utc>>,
    pub cancel_time: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemResponse>,
}

impl OrderResponse {
    pub fn from_parts(m: order_entity::Model, items: Vec<order_item_entity::Model>) -> Self {
        Self {
            order_num: m.order_num,
            all_price: m.all_price,
            order_status: m.order_status,
            order_type: m.order_type,
            address_id: m.address_id,
            remark: m.remark,
            expire_time: m.expire_time,
            pay_time: m.pay_time,
            cancel_time: m.cancel_time,
            created_at: m.created_at,
            items: items.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PayOrderResponse {
    pub order_num: String,
    pub pay_time: DateTime<Utc>,
}
