pub mod order_items;
pub mod orders;
pub mod product_skus;
pub mod products;
pub mod seckill_orders;
pub mod seckill_products;

pub use order_items as order_item_entity;
pub use orders as order_entity;
pub use orders::{OrderStatus, OrderType};
pub use product_skus as product_sku_entity;
pub use products as product_entity;
pub use seckill_orders as seckill_order_entity;
pub use seckill_orders::SeckillOrderStatus;
pub use seckill_products as seckill_product_entity;
pub use seckill_products::SeckillStatus;
