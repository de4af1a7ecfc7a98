//! In-process fast store.
//!
//! Mirrors the Redis layout (strings with expiry, sorted sets, lists) behind a single
//! mutex, so every trait call is indivisible. Only suitable for a single node.

use super::keys;
use super::{FastStore, PreheatEntry, ReserveRequest, ReserveStatus, StoreResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct StringEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, StringEntry>,
    zsets: HashMap<String, HashMap<String, f64>>,
    lists: HashMap<String, VecDeque<String>>,
    /// 限流窗口 key 的过期时间，对应 Redis 端的 PEXPIRE
    window_expiry: HashMap<String, Instant>,
    next_window_sweep: Option<Instant>,
}

impl Inner {
    fn live(&mut self, key: &str) -> Option<&mut StringEntry> {
        let expired = self
            .strings
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.strings.remove(key);
            return None;
        }
        self.strings.get_mut(key)
    }

    fn exists(&mut self, key: &str) -> bool {
        self.live(key).is_some()
    }

    fn get_string(&mut self, key: &str) -> Option<String> {
        self.live(key)
            .map(|e| String::from_utf8_lossy(&e.data).into_owned())
    }

    fn get_i64(&mut self, key: &str) -> Option<i64> {
        self.get_string(key).and_then(|s| s.parse().ok())
    }

    fn set(&mut self, key: &str, data: Vec<u8>, ttl: Option<Duration>) {
        self.strings.insert(
            key.to_string(),
            StringEntry {
                data,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
    }

    /// 保留原有过期时间，等同 INCRBY
    fn incr_by(&mut self, key: &str, delta: i64) -> i64 {
        let current = self.get_i64(key).unwrap_or(0) + delta;
        let expires_at = self.live(key).and_then(|e| e.expires_at);
        self.strings.insert(
            key.to_string(),
            StringEntry {
                data: current.to_string().into_bytes(),
                expires_at,
            },
        );
        current
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64) {
        self.zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
    }

    fn zrem(&mut self, key: &str, member: &str) -> bool {
        self.zsets
            .get_mut(key)
            .is_some_and(|z| z.remove(member).is_some())
    }

    /// 按分数升序（同分按成员字典序）返回 [min, max] 区间，min_exclusive 对应 "(min"
    fn zrange_by_score(&self, key: &str, min: f64, min_exclusive: bool, max: f64) -> Vec<String> {
        let Some(z) = self.zsets.get(key) else {
            return Vec::new();
        };
        let mut hits: Vec<(&String, f64)> = z
            .iter()
            .filter(|(_, s)| {
                let above = if min_exclusive { **s > min } else { **s >= min };
                above && **s <= max
            })
            .map(|(m, s)| (m, *s))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        hits.into_iter().map(|(m, _)| m.clone()).collect()
    }

    /// 清理过期的限流窗口，每个窗口周期最多扫描一次
    fn sweep_windows(&mut self, now: Instant, window: Duration) {
        if self.next_window_sweep.is_some_and(|at| at > now) {
            return;
        }
        let expired: Vec<String> = self
            .window_expiry
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.window_expiry.remove(&key);
            self.zsets.remove(&key);
        }
        self.next_window_sweep = Some(now + window);
    }

    fn lpush(&mut self, key: &str, value: &str) {
        self.lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    queue_signal: Arc<Notify>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_pop(&self) -> Option<String> {
        self.lock()
            .lists
            .get_mut(keys::ORDER_QUEUE)
            .and_then(|q| q.pop_back())
    }

    /// 队列当前长度（测试与诊断用）
    pub fn queue_len(&self) -> usize {
        self.lock()
            .lists
            .get(keys::ORDER_QUEUE)
            .map_or(0, |q| q.len())
    }

    /// 重试集合中的任务数（测试与诊断用）
    pub fn retry_len(&self) -> usize {
        self.lock().zsets.get(keys::RETRY_SET).map_or(0, |z| z.len())
    }

    /// 当前保留的限流窗口数
    pub fn window_count(&self) -> usize {
        self.lock().window_expiry.len()
    }

    /// 延迟队列中某订单的截止时间
    pub fn expiry_of(&self, order_num: &str) -> Option<i64> {
        self.lock()
            .zsets
            .get(keys::ORDER_DELAY)
            .and_then(|z| z.get(order_num))
            .map(|s| *s as i64)
    }
}

#[async_trait]
impl FastStore for MemoryStore {
    async fn preheat(&self, entry: &PreheatEntry<'_>) -> StoreResult<bool> {
        let mut inner = self.lock();
        let stock_key = keys::stock(entry.seckill_id);
        if inner.exists(&stock_key) {
            return Ok(false);
        }
        let ttl = Some(entry.ttl);
        inner.set(&stock_key, entry.stock.to_string().into_bytes(), ttl);
        inner.set(
            &keys::product(entry.seckill_id),
            entry.snapshot_json.as_bytes().to_vec(),
            ttl,
        );
        let member = entry.seckill_id.to_string();
        inner.zadd(keys::START_INDEX, &member, entry.start_ts as f64);
        inner.zadd(keys::END_INDEX, &member, entry.end_ts as f64);
        Ok(true)
    }

    async fn reserve(&self, req: &ReserveRequest<'_>) -> StoreResult<ReserveStatus> {
        let status = {
            let mut inner = self.lock();
            let marker = keys::purchase_marker(req.seckill_id, req.user_id);
            let stock_key = keys::stock(req.seckill_id);
            if inner.exists(&marker) {
                ReserveStatus::Duplicate
            } else {
                match inner.get_i64(&stock_key) {
                    None => ReserveStatus::NotFound,
                    Some(stock) if stock <= 0 => ReserveStatus::SoldOut,
                    Some(_) => {
                        inner.incr_by(&stock_key, -1);
                        inner.set(
                            &marker,
                            req.order_num.as_bytes().to_vec(),
                            Some(req.marker_ttl),
                        );
                        inner.lpush(keys::ORDER_QUEUE, req.task_json);
                        inner.zadd(keys::ORDER_DELAY, req.order_num, req.deadline_ts as f64);
                        ReserveStatus::Reserved
                    }
                }
            }
        };
        if status == ReserveStatus::Reserved {
            self.queue_signal.notify_one();
        }
        Ok(status)
    }

    async fn credit_back(
        &self,
        seckill_id: i64,
        user_id: i64,
        order_num: &str,
    ) -> StoreResult<bool> {
        let mut inner = self.lock();
        let marker = keys::purchase_marker(seckill_id, user_id);
        if inner.get_string(&marker).as_deref() != Some(order_num) {
            return Ok(false);
        }
        inner.strings.remove(&marker);
        let stock_key = keys::stock(seckill_id);
        if inner.exists(&stock_key) {
            inner.incr_by(&stock_key, 1);
        }
        Ok(true)
    }

    async fn evict(&self, seckill_id: i64) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.strings.remove(&keys::stock(seckill_id));
        inner.strings.remove(&keys::product(seckill_id));
        let member = seckill_id.to_string();
        inner.zrem(keys::START_INDEX, &member);
        inner.zrem(keys::END_INDEX, &member);
        Ok(())
    }

    async fn has_purchased(&self, seckill_id: i64, user_id: i64) -> StoreResult<bool> {
        Ok(self
            .lock()
            .exists(&keys::purchase_marker(seckill_id, user_id)))
    }

    async fn snapshot(&self, seckill_id: i64) -> StoreResult<Option<String>> {
        Ok(self.lock().get_string(&keys::product(seckill_id)))
    }

    async fn stock(&self, seckill_id: i64) -> StoreResult<Option<i64>> {
        Ok(self.lock().get_i64(&keys::stock(seckill_id)))
    }

    async fn snapshots(&self, ids: &[i64]) -> StoreResult<HashMap<i64, String>> {
        let mut inner = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| inner.get_string(&keys::product(*id)).map(|v| (*id, v)))
            .collect())
    }

    async fn stocks(&self, ids: &[i64]) -> StoreResult<HashMap<i64, i64>> {
        let mut inner = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| inner.get_i64(&keys::stock(*id)).map(|v| (*id, v)))
            .collect())
    }

    async fn active_ids(
        &self,
        now_ts: i64,
        offset: u64,
        limit: u64,
    ) -> StoreResult<(Vec<i64>, u64)> {
        let inner = self.lock();
        let all = inner.zrange_by_score(keys::END_INDEX, now_ts as f64, true, f64::INFINITY);
        let total = all.len() as u64;
        let ids = all
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .filter_map(|m| m.parse::<i64>().ok())
            .collect();
        Ok((ids, total))
    }

    async fn push_task(&self, task_json: &str) -> StoreResult<()> {
        self.lock().lpush(keys::ORDER_QUEUE, task_json);
        self.queue_signal.notify_one();
        Ok(())
    }

    async fn pop_task(&self, timeout: Duration) -> StoreResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task) = self.try_pop() {
                return Ok(Some(task));
            }
            let notified = self.queue_signal.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.try_pop());
            }
        }
    }

    async fn schedule_retry(&self, task_json: &str, next_attempt_ms: i64) -> StoreResult<()> {
        self.lock()
            .zadd(keys::RETRY_SET, task_json, next_attempt_ms as f64);
        Ok(())
    }

    async fn promote_retries(&self, now_ms: i64, limit: usize) -> StoreResult<usize> {
        let moved = {
            let mut inner = self.lock();
            let due: Vec<String> = inner
                .zrange_by_score(keys::RETRY_SET, f64::NEG_INFINITY, false, now_ms as f64)
                .into_iter()
                .take(limit)
                .collect();
            for task in &due {
                inner.zrem(keys::RETRY_SET, task);
                inner.lpush(keys::ORDER_QUEUE, task);
            }
            due.len()
        };
        if moved > 0 {
            self.queue_signal.notify_one();
        }
        Ok(moved)
    }

    async fn push_dead_letter(&self, letter_json: &str) -> StoreResult<()> {
        self.lock().lpush(keys::DEAD_LETTER, letter_json);
        Ok(())
    }

    async fn dead_letters(&self, offset: u64, limit: u64) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()
            .lists
            .get(keys::DEAD_LETTER)
            .map(|l| {
                l.iter()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn dead_letter_count(&self) -> StoreResult<u64> {
        Ok(self
            .lock()
            .lists
            .get(keys::DEAD_LETTER)
            .map_or(0, |l| l.len() as u64))
    }

    async fn schedule_expiry(&self, order_num: &str, deadline_ts: i64) -> StoreResult<()> {
        self.lock()
            .zadd(keys::ORDER_DELAY, order_num, deadline_ts as f64);
        Ok(())
    }

    async fn due_expiries(&self, now_ts: i64, limit: usize) -> StoreResult<Vec<String>> {
        let inner = self.lock();
        Ok(inner
            .zrange_by_score(keys::ORDER_DELAY, f64::NEG_INFINITY, false, now_ts as f64)
            .into_iter()
            .take(limit)
            .collect())
    }

    async fn remove_expiry(&self, order_num: &str) -> StoreResult<()> {
        self.lock().zrem(keys::ORDER_DELAY, order_num);
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
        let mut inner = self.lock();
        let window_len = Duration::from_millis(window_ms.max(1) as u64);
        let now = Instant::now();
        inner.sweep_windows(now, window_len);

        let window_start = (now_ms - window_ms) as f64;
        let window = inner.zsets.entry(key.to_string()).or_default();
        window.retain(|_, score| *score > window_start);
        let count = window.len() as u64;
        if count >= limit {
            if count == 0 {
                inner.zsets.remove(key);
                inner.window_expiry.remove(key);
            }
            return Ok((false, count));
        }
        window.insert(member.to_string(), now_ms as f64);
        inner
            .window_expiry
            .insert(key.to_string(), now + window_len * 2);
        Ok((true, count + 1))
    }

    async fn load_blob(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.lock().live(key).map(|e| e.data.clone()))
    }

    async fn save_blob(&self, key: &str, data: &[u8], ttl: Duration) -> StoreResult<()> {
        self.lock().set(key, data.to_vec(), Some(ttl));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preheat_entry(id: i64, stock: i64) -> PreheatEntry<'static> {
        PreheatEntry {
            seckill_id: id,
            stock,
            snapshot_json: r#"{"id":1}"#,
            start_ts: 1_000,
            end_ts: 2_000,
            ttl: Duration::from_secs(3600),
        }
    }

    fn reserve_req(id: i64, user_id: i64, order_num: &str) -> ReserveRequest<'_> {
        ReserveRequest {
            seckill_id: id,
            user_id,
            order_num,
            task_json: order_num,
            deadline_ts: 5_000,
            marker_ttl: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_preheat_is_first_writer_wins() {
        let store = MemoryStore::new();
        assert!(store.preheat(&preheat_entry(1, 10)).await.unwrap());
        assert!(!store.preheat(&preheat_entry(1, 99)).await.unwrap());
        assert_eq!(store.stock(1).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_reserve_outcomes() {
        let store = MemoryStore::new();
        assert_eq!(
            store.reserve(&reserve_req(1, 7, "A")).await.unwrap(),
            ReserveStatus::NotFound
        );

        store.preheat(&preheat_entry(1, 1)).await.unwrap();
        assert_eq!(
            store.reserve(&reserve_req(1, 7, "A")).await.unwrap(),
            ReserveStatus::Reserved
        );
        assert_eq!(
            store.reserve(&reserve_req(1, 7, "B")).await.unwrap(),
            ReserveStatus::Duplicate
        );
        assert_eq!(
            store.reserve(&reserve_req(1, 8, "C")).await.unwrap(),
            ReserveStatus::SoldOut
        );

        assert_eq!(store.stock(1).await.unwrap(), Some(0));
        assert_eq!(store.queue_len(), 1);
        assert_eq!(store.expiry_of("A"), Some(5_000));
        assert_eq!(store.expiry_of("C"), None);
    }

    #[tokio::test]
    async fn test_credit_back_only_once() {
        let store = MemoryStore::new();
        store.preheat(&preheat_entry(1, 1)).await.unwrap();
        store.reserve(&reserve_req(1, 7, "A")).await.unwrap();

        assert!(store.credit_back(1, 7, "A").await.unwrap());
        assert!(!store.credit_back(1, 7, "A").await.unwrap());
        assert_eq!(store.stock(1).await.unwrap(), Some(1));
        assert!(!store.has_purchased(1, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_credit_back_ignores_other_order() {
        let store = MemoryStore::new();
        store.preheat(&preheat_entry(1, 1)).await.unwrap();
        store.reserve(&reserve_req(1, 7, "A")).await.unwrap();
        store.credit_back(1, 7, "A").await.unwrap();
        store.reserve(&reserve_req(1, 7, "B")).await.unwrap();

        // 旧订单 A 的回补不能释放 B 占用的库存
        assert!(!store.credit_back(1, 7, "A").await.unwrap());
        assert_eq!(store.stock(1).await.unwrap(), Some(0));
        assert!(store.has_purchased(1, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_queue_is_fifo_and_pop_times_out() {
        let store = MemoryStore::new();
        store.push_task("first").await.unwrap();
        store.push_task("second").await.unwrap();
        let timeout = Duration::from_millis(10);
        assert_eq!(store.pop_task(timeout).await.unwrap().as_deref(), Some("first"));
        assert_eq!(store.pop_task(timeout).await.unwrap().as_deref(), Some("second"));
        assert_eq!(store.pop_task(timeout).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_retry_promoted_only_when_due() {
        let store = MemoryStore::new();
        store.schedule_retry("task", 2_000).await.unwrap();
        assert_eq!(store.promote_retries(1_999, 10).await.unwrap(), 0);
        assert_eq!(store.promote_retries(2_000, 10).await.unwrap(), 1);
        assert_eq!(store.retry_len(), 0);
        assert_eq!(store.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_active_ids_excludes_ended() {
        let store = MemoryStore::new();
        let mut ended = preheat_entry(1, 1);
        ended.end_ts = 100;
        store.preheat(&ended).await.unwrap();
        store.preheat(&preheat_entry(2, 1)).await.unwrap();
        store.preheat(&preheat_entry(3, 1)).await.unwrap();

        let (ids, total) = store.active_ids(100, 0, 1).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_sliding_window() {
        let store = MemoryStore::new();
        assert_eq!(store.admit_in_window("k", "a", 1_000, 1_000, 2).await.unwrap(), (true, 1));
        assert_eq!(store.admit_in_window("k", "b", 1_100, 1_000, 2).await.unwrap(), (true, 2));
        assert_eq!(store.admit_in_window("k", "c", 1_200, 1_000, 2).await.unwrap(), (false, 2));
        // "a" 已滑出窗口
        assert_eq!(store.admit_in_window("k", "d", 2_050, 1_000, 2).await.unwrap(), (true, 2));
    }

    #[tokio::test]
    async fn test_idle_windows_are_dropped() {
        let store = MemoryStore::new();
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            let key = keys::rate_limit("ip", ip);
            store.admit_in_window(&key, "m", 1_000, 10, 5).await.unwrap();
        }
        assert_eq!(store.window_count(), 3);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let key = keys::rate_limit("ip", "10.0.0.4");
        store.admit_in_window(&key, "m", 1_030, 10, 5).await.unwrap();
        assert_eq!(store.window_count(), 1);
        assert_eq!(store.lock().zsets.len(), 1);
    }
}
