//! Fast-store key layout.

pub const START_INDEX: &str = "seckill:index:start";
pub const END_INDEX: &str = "seckill:index:end";
pub const ORDER_QUEUE: &str = "seckill:order:queue";
pub const RETRY_SET: &str = "seckill:order:retry";
pub const DEAD_LETTER: &str = "seckill:order:dead";
pub const ORDER_DELAY: &str = "order:delay:queue";
pub const SECKILL_BLOOM: &str = "bloom:seckill";

pub fn stock(seckill_id: i64) -> String {
    format!("seckill:stock:{seckill_id}")
}

pub fn product(seckill_id: i64) -> String {
    format!("seckill:product:{seckill_id}")
}

pub fn purchase_marker(seckill_id: i64, user_id: i64) -> String {
    format!("seckill:user:{seckill_id}:{user_id}")
}

pub fn rate_limit(scope: &str, id: &str) -> String {
    if id.is_empty() {
        format!("rate_limit:{scope}")
    } else {
        format!("rate_limit:{scope}:{id}")
    }
}
