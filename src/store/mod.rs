//! Fast store (hot-path key/value state).
//!
//! Every multi-step operation on this trait is indivisible: the Redis backend runs
//! each one as a single Lua script, the memory backend under one lock. Queue payloads
//! and snapshots cross this boundary as JSON strings; typing them is the caller's job.

pub mod keys;
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

pub type StoreResult<T> = Result<T, StoreError>;

pub type SharedStore = Arc<dyn FastStore>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("unexpected script reply: {0}")]
    UnexpectedReply(String),
}

/// 预热写入的数据
#[derive(Debug, Clone)]
pub struct PreheatEntry<'a> {
    pub seckill_id: i64,
    pub stock: i64,
    pub snapshot_json: &'a str,
    pub start_ts: i64,
    pub end_ts: i64,
    pub ttl: Duration,
}

/// 一次原子预占请求
#[derive(Debug, Clone)]
pub struct ReserveRequest<'a> {
    pub seckill_id: i64,
    pub user_id: i64,
    pub order_num: &'a str,
    /// 成功时投递到写库队列的任务
    pub task_json: &'a str,
    /// 支付截止时间（秒），成功时写入延迟队列
    pub deadline_ts: i64,
    pub marker_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveStatus {
    Reserved,
    Duplicate,
    NotFound,
    SoldOut,
}

impl ReserveStatus {
    /// 脚本返回码: 1 成功, -1 重复购买, -2 库存不足, -3 未预热
    pub(crate) fn from_script_code(code: i64) -> StoreResult<Self> {
        match code {
            1 => Ok(ReserveStatus::Reserved),
            -1 => Ok(ReserveStatus::Duplicate),
            -2 => Ok(ReserveStatus::SoldOut),
            -3 => Ok(ReserveStatus::NotFound),
            other => Err(StoreError::UnexpectedReply(format!("reserve returned {other}"))),
        }
    }
}

#[async_trait]
pub trait FastStore: Send + Sync {
    // ---------- 库存与商品快照 ----------

    /// 不存在时写入库存、快照与时间索引；已存在返回 false
    async fn preheat(&self, entry: &PreheatEntry<'_>) -> StoreResult<bool>;

    /// 查重、查库存、扣减、打标记、入队、登记截止时间，一步完成
    async fn reserve(&self, req: &ReserveRequest<'_>) -> StoreResult<ReserveStatus>;

    /// 仅当购买标记仍指向 `order_num` 时回补库存并删除标记，返回是否真正回补
    async fn credit_back(&self, seckill_id: i64, user_id: i64, order_num: &str)
    -> StoreResult<bool>;

    /// 删除库存、快照与时间索引
    async fn evict(&self, seckill_id: i64) -> StoreResult<()>;

    async fn has_purchased(&self, seckill_id: i64, user_id: i64) -> StoreResult<bool>;

    async fn snapshot(&self, seckill_id: i64) -> StoreResult<Option<String>>;

    async fn stock(&self, seckill_id: i64) -> StoreResult<Option<i64>>;

    async fn snapshots(&self, ids: &[i64]) -> StoreResult<HashMap<i64, String>>;

    async fn stocks(&self, ids: &[i64]) -> StoreResult<HashMap<i64, i64>>;

    /// 结束时间晚于 now 的秒杀 ID（按结束时间升序分页）与总数
    async fn active_ids(&self, now_ts: i64, offset: u64, limit: u64)
    -> StoreResult<(Vec<i64>, u64)>;

    // ---------- 写库队列 ----------

    async fn push_task(&self, task_json: &str) -> StoreResult<()>;

    /// 阻塞出队，最长等待 timeout
    async fn pop_task(&self, timeout: Duration) -> StoreResult<Option<String>>;

    /// 放入重试集合，到 `next_attempt_ms` 后才可再次出队
    async fn schedule_retry(&self, task_json: &str, next_attempt_ms: i64) -> StoreResult<()>;

    /// 将到期的重试任务移回队列，返回移动数量
    async fn promote_retries(&self, now_ms: i64, limit: usize) -> StoreResult<usize>;

    async fn push_dead_letter(&self, letter_json: &str) -> StoreResult<()>;

    async fn dead_letters(&self, offset: u64, limit: u64) -> StoreResult<Vec<String>>;

    async fn dead_letter_count(&self) -> StoreResult<u64>;

    // ---------- 订单延迟队列 ----------

    async fn schedule_expiry(&self, order_num: &str, deadline_ts: i64) -> StoreResult<()>;

    async fn due_expiries(&self, now_ts: i64, limit: usize) -> StoreResult<Vec<String>>;

    async fn remove_expiry(&self, order_num: &str) -> StoreResult<()>;

    // ---------- 限流 ----------

    /// 滑动窗口：清理过期、计数、未超限则记录，返回 (是否放行, 当前计数)
    async fn admit_in_window(
        &self,
        key: &str,
        member: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
    ) -> StoreResult<(bool, u64)>;

    // ---------- 二进制数据（布隆过滤器） ----------

    async fn load_blob(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn save_blob(&self, key: &str, data: &[u8], ttl: Duration) -> StoreResult<()>;
}
