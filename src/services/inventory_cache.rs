use crate::error::AppResult;
use crate::models::{QueueTask, SeckillSnapshot};
use crate::store::{PreheatEntry, ReserveRequest, ReserveStatus, SharedStore};
use chrono::Duration;
use std::time::Duration as StdDuration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreheatOutcome {
    Preheated,
    AlreadyPreheated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    Success(QueueTask),
    Duplicate,
    NotFound,
    SoldOut,
}

/// 秒杀热数据：库存计数、商品快照、购买标记与时间索引
#[derive(Clone)]
pub struct InventoryCache {
    store: SharedStore,
    marker_ttl: StdDuration,
    preheat_grace: Duration,
}

impl InventoryCache {
    pub fn new(store: SharedStore, marker_ttl_hours: i64, preheat_grace_hours: i64) -> Self {
        Self {
            store,
            marker_ttl: StdDuration::from_secs(marker_ttl_hours.max(1) as u64 * 3600),
            preheat_grace: Duration::hours(preheat_grace_hours),
        }
    }

    /// 过期时间 = 活动结束 + 宽限期
    pub fn preheat_expire_ts(&self, snapshot: &SeckillSnapshot) -> i64 {
        snapshot.end_time + self.preheat_grace.num_seconds()
    }

    pub async fn preheat(
        &self,
        snapshot: &SeckillSnapshot,
        stock: i64,
        now_ts: i64,
    ) -> AppResult<PreheatOutcome> {
        let snapshot_json = serde_json::to_string(snapshot)?;
        let ttl_secs = (self.preheat_expire_ts(snapshot) - now_ts).max(1) as u64;
        let written = self
            .store
            .preheat(&PreheatEntry {
                seckill_id: snapshot.seckill_id,
                stock,
                snapshot_json: &snapshot_json,
                start_ts: snapshot.start_time,
                end_ts: snapshot.end_time,
                ttl: StdDuration::from_secs(ttl_secs),
            })
            .await?;
        Ok(if written {
            PreheatOutcome::Preheated
        } else {
            PreheatOutcome::AlreadyPreheated
        })
    }

    /// 原子预占：成功时任务已入写库队列、截止时间已登记
    pub async fn reserve(&self, task: QueueTask) -> AppResult<ReserveOutcome> {
        let task_json = serde_json::to_string(&task)?;
        let status = self
            .store
            .reserve(&ReserveRequest {
                seckill_id: task.seckill_id,
                user_id: task.user_id,
                order_num: &task.order_num,
                task_json: &task_json,
                deadline_ts: task.deadline,
                marker_ttl: self.marker_ttl,
            })
            .await?;
        Ok(match status {
            ReserveStatus::Reserved => ReserveOutcome::Success(task),
            ReserveStatus::Duplicate => ReserveOutcome::Duplicate,
            ReserveStatus::NotFound => ReserveOutcome::NotFound,
            ReserveStatus::SoldOut => ReserveOutcome::SoldOut,
        })
    }

    /// 只能在取消事务提交之后调用；标记已属于其他订单时不回补
    pub async fn credit_back(
        &self,
        seckill_id: i64,
        user_id: i64,
        order_num: &str,
    ) -> AppResult<bool> {
        Ok(self
            .store
            .credit_back(seckill_id, user_id, order_num)
            .await?)
    }

    pub async fn evict(&self, seckill_id: i64) -> AppResult<()> {
        Ok(self.store.evict(seckill_id).await?)
    }

    pub async fn has_purchased(&self, seckill_id: i64, user_id: i64) -> AppResult<bool> {
        Ok(self.store.has_purchased(seckill_id, user_id).await?)
    }

    pub async fn snapshot(&self, seckill_id: i64) -> AppResult<Option<SeckillSnapshot>> {
        match self.store.snapshot(seckill_id).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn stock(&self, seckill_id: i64) -> AppResult<Option<i64>> {
        Ok(self.store.stock(seckill_id).await?)
    }

    /// 未结束的秒杀商品（按结束时间升序）及其实时库存，外加总数
    pub async fn list_active(
        &self,
        now_ts: i64,
        offset: u64,
        limit: u64,
    ) -> AppResult<(Vec<(SeckillSnapshot, i64)>, u64)> {
        let (ids, total) = self.store.active_ids(now_ts, offset, limit).await?;
        if ids.is_empty() {
            return Ok((Vec::new(), total));
        }
        let snapshots = self.store.snapshots(&ids).await?;
        let stocks = self.store.stocks(&ids).await?;

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(raw) = snapshots.get(&id) else {
                continue;
            };
            match serde_json::from_str::<SeckillSnapshot>(raw) {
                Ok(snapshot) => items.push((snapshot, stocks.get(&id).copied().unwrap_or(0))),
                Err(e) => log::warn!("Skipping unreadable snapshot for seckill {id}: {e}"),
            }
        }
        Ok((items, total))
    }
}
