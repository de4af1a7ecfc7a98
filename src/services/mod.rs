pub mod admin_seckill_service;
pub mod existence_filter;
pub mod inventory_cache;
pub mod order_service;
pub mod rate_limiter;
pub mod seckill_service;

pub use admin_seckill_service::*;
pub use existence_filter::*;
pub use inventory_cache::*;
pub use order_service::*;
pub use rate_limiter::*;
pub use seckill_service::*;
