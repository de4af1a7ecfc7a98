//! Redis-backed fast store.
//!
//! Check-then-mutate sequences run as Lua scripts so Redis executes them atomically.

use super::keys;
use super::{FastStore, PreheatEntry, ReserveRequest, ReserveStatus, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

// KEYS: stock, product, start index, end index
// ARGV: stock, snapshot, ttl, id, start, end
static PREHEAT_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 1 then
            return 0
        end
        redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
        redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[3])
        redis.call('ZADD', KEYS[3], ARGV[5], ARGV[4])
        redis.call('ZADD', KEYS[4], ARGV[6], ARGV[4])
        return 1
        "#,
    )
});

// KEYS: marker, stock, order queue, delay set
// ARGV: task json, marker ttl, deadline, order num
static RESERVE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 1 then
            return -1
        end
        local stock = redis.call('GET', KEYS[2])
        if not stock then
            return -3
        end
        if tonumber(stock) <= 0 then
            return -2
        end
        redis.call('DECR', KEYS[2])
        redis.call('SET', KEYS[1], ARGV[4], 'EX', ARGV[2])
        redis.call('LPUSH', KEYS[3], ARGV[1])
        redis.call('ZADD', KEYS[4], ARGV[3], ARGV[4])
        return 1
        "#,
    )
});

// 标记仍指向该订单才回补，重复调用或旧订单不会多加库存
// KEYS: marker, stock
// ARGV: order num
static CREDIT_BACK_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) ~= ARGV[1] then
            return 0
        end
        redis.call('DEL', KEYS[1])
        if redis.call('EXISTS', KEYS[2]) == 1 then
            redis.call('INCR', KEYS[2])
        end
        return 1
        "#,
    )
});

// KEYS: retry set, order queue
// ARGV: now ms, limit
static PROMOTE_RETRIES_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
        for _, v in ipairs(due) do
            redis.call('ZREM', KEYS[1], v)
            redis.call('LPUSH', KEYS[2], v)
        end
        return #due
        "#,
    )
});

// KEYS: window key
// ARGV: window start, now, limit, member, ttl ms
static SLIDING_WINDOW_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
        local count = redis.call('ZCARD', KEYS[1])
        if count >= tonumber(ARGV[3]) then
            return {0, count}
        end
        redis.call('ZADD', KEYS[1], ARGV[2], ARGV[4])
        redis.call('PEXPIRE', KEYS[1], ARGV[5])
        return {1, count + 1}
        "#,
    )
});

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    /// BRPOP 独占连接，避免阻塞多路复用的主连接
    blocking_conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let blocking_conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            blocking_conn,
        })
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl FastStore for RedisStore {
    async fn preheat(&self, entry: &PreheatEntry<'_>) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let written: i64 = PREHEAT_SCRIPT
            .key(keys::stock(entry.seckill_id))
            .key(keys::product(entry.seckill_id))
            .key(keys::START_INDEX)
            .key(keys::END_INDEX)
            .arg(entry.stock)
            .arg(entry.snapshot_json)
            .arg(Self::ttl_secs(entry.ttl))
            .arg(entry.seckill_id)
            .arg(entry.start_ts)
            .arg(entry.end_ts)
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn reserve(&self, req: &ReserveRequest<'_>) -> StoreResult<ReserveStatus> {
        let mut conn = self.conn.clone();
        let code: i64 = RESERVE_SCRIPT
            .key(keys::purchase_marker(req.seckill_id, req.user_id))
            .key(keys::stock(req.seckill_id))
            .key(keys::ORDER_QUEUE)
            .key(keys::ORDER_DELAY)
            .arg(req.task_json)
            .arg(Self::ttl_secs(req.marker_ttl))
            .arg(req.deadline_ts)
            .arg(req.order_num)
            .invoke_async(&mut conn)
            .await?;
        ReserveStatus::from_script_code(code)
    }

    async fn credit_back(
        &self,
        seckill_id: i64,
        user_id: i64,
        order_num: &str,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let credited: i64 = CREDIT_BACK_SCRIPT
            .key(keys::purchase_marker(seckill_id, user_id))
            .key(keys::stock(seckill_id))
            .arg(order_num)
            .invoke_async(&mut conn)
            .await?;
        Ok(credited == 1)
    }

    async fn evict(&self, seckill_id: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(keys::stock(seckill_id))
            .ignore()
            .del(keys::product(seckill_id))
            .ignore()
            .zrem(keys::START_INDEX, seckill_id)
            .ignore()
            .zrem(keys::END_INDEX, seckill_id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn has_purchased(&self, seckill_id: i64, user_id: i64) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(keys::purchase_marker(seckill_id, user_id))
            .await?;
        Ok(exists)
    }

    async fn snapshot(&self, seckill_id: i64) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(keys::product(seckill_id)).await?;
        Ok(data)
    }

    async fn stock(&self, seckill_id: i64) -> StoreResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let stock: Option<i64> = conn.get(keys::stock(seckill_id)).await?;
        Ok(stock)
    }

    async fn snapshots(&self, ids: &[i64]) -> StoreResult<HashMap<i64, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn.clone();
        let product_keys: Vec<String> = ids.iter().map(|id| keys::product(*id)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&product_keys)
            .query_async(&mut conn)
            .await?;
        Ok(ids
            .iter()
            .zip(values)
            .filter_map(|(id, v)| v.map(|v| (*id, v)))
            .collect())
    }

    async fn stocks(&self, ids: &[i64]) -> StoreResult<HashMap<i64, i64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn.clone();
        let stock_keys: Vec<String> = ids.iter().map(|id| keys::stock(*id)).collect();
        let values: Vec<Option<i64>> = redis::cmd("MGET")
            .arg(&stock_keys)
            .query_async(&mut conn)
            .await?;
        Ok(ids
            .iter()
            .zip(values)
            .filter_map(|(id, v)| v.map(|v| (*id, v)))
            .collect())
    }

    async fn active_ids(
        &self,
        now_ts: i64,
        offset: u64,
        limit: u64,
    ) -> StoreResult<(Vec<i64>, u64)> {
        let mut conn = self.conn.clone();
        // 结束时间 > now（开区间）
        let min = format!("({now_ts}");
        let (members, total): (Vec<String>, u64) = redis::pipe()
            .atomic()
            .cmd("ZRANGEBYSCORE")
            .arg(keys::END_INDEX)
            .arg(&min)
            .arg("+inf")
            .arg("LIMIT")
            .arg(offset)
            .arg(limit)
            .cmd("ZCOUNT")
            .arg(keys::END_INDEX)
            .arg(&min)
            .arg("+inf")
            .query_async(&mut conn)
            .await?;
        let ids = members
            .iter()
            .filter_map(|m| m.parse::<i64>().ok())
            .collect();
        Ok((ids, total))
    }

    async fn push_task(&self, task_json: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(keys::ORDER_QUEUE, task_json).await?;
        Ok(())
    }

    async fn pop_task(&self, timeout: Duration) -> StoreResult<Option<String>> {
        let mut conn = self.blocking_conn.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(keys::ORDER_QUEUE)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn schedule_retry(&self, task_json: &str, next_attempt_ms: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(keys::RETRY_SET, task_json, next_attempt_ms)
            .await?;
        Ok(())
    }

    async fn promote_retries(&self, now_ms: i64, limit: usize) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let moved: usize = PROMOTE_RETRIES_SCRIPT
            .key(keys::RETRY_SET)
            .key(keys::ORDER_QUEUE)
            .arg(now_ms)
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn push_dead_letter(&self, letter_json: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(keys::DEAD_LETTER, letter_json).await?;
        Ok(())
    }

    async fn dead_letters(&self, offset: u64, limit: u64) -> StoreResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let start = offset as isize;
        let stop = (offset + limit - 1) as isize;
        let letters: Vec<String> = conn.lrange(keys::DEAD_LETTER, start, stop).await?;
        Ok(letters)
    }

    async fn dead_letter_count(&self) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(keys::DEAD_LETTER).await?;
        Ok(len)
    }

    async fn schedule_expiry(&self, order_num: &str, deadline_ts: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(keys::ORDER_DELAY, order_num, deadline_ts).await?;
        Ok(())
    }

    async fn due_expiries(&self, now_ts: i64, limit: usize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let due: Vec<String> = conn
            .zrangebyscore_limit(keys::ORDER_DELAY, "-inf", now_ts, 0, limit as isize)
            .await?;
        Ok(due)
    }

    async fn remove_expiry(&self, order_num: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(keys::ORDER_DELAY, order_num).await?;
        Ok(())
    }

    async fn admit_in_window(
        &self,
        key: &str,
        member: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
    ) -> StoreResult<(bool, u64)> {
        let mut conn = self.conn.clone();
        let (admitted, count): (i64, u64) = SLIDING_WINDOW_SCRIPT
            .key(key)
            .arg(now_ms - window_ms)
            .arg(now_ms)
            .arg(limit)
            .arg(member)
            .arg(window_ms * 2)
            .invoke_async(&mut conn)
            .await?;
        Ok((admitted == 1, count))
    }

    async fn load_blob(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn.get(key).await?;
        Ok(data)
    }

    async fn save_blob(&self, key: &str, data: &[u8], ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, data, Self::ttl_secs(ttl)).await?;
        Ok(())
    }
}
