use crate::config::ReaperConfig;
use crate::error::AppResult;
use crate::services::{CloseOutcome, OrderService};
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapStats {
    pub closed: usize,
    pub skipped: usize,
    pub missing: usize,
    pub failed: usize,
}

/// 统一的超时关单扫描：普通订单与秒杀订单共用一个延迟集合
#[derive(Clone)]
pub struct ExpiryReaper {
    store: SharedStore,
    orders: OrderService,
    config: ReaperConfig,
}

impl ExpiryReaper {
    pub fn new(store: SharedStore, orders: OrderService, config: ReaperConfig) -> Self {
        Self {
            store,
            orders,
            config,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!("Order expiry reaper started");
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.tick_millis.max(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if super::stopping(&shutdown) {
                break;
            }
            match self.tick(Utc::now()).await {
                Ok(stats) if stats != ReapStats::default() => log::info!("Expiry reaper pass: {stats:?}"),
                Ok(_) => {}
                Err(e) => log::error!("Expiry reaper failed to scan due orders: {e}"),
            }
        }
        log::info!("Order expiry reaper stopped");
    }

    /// 处理一批已到期的订单；出错的条目保留到下一轮
    pub async fn tick(&self, now: DateTime<Utc>) -> AppResult<ReapStats> {
        let due = self
            .store
            .due_expiries(now.timestamp(), self.config.batch_size)
            .await?;
        let mut stats = ReapStats::default();

        for order_num in due {
            match self.orders.close_expired(&order_num, now).await {
                Ok(outcome) => {
                    match outcome {
                        CloseOutcome::Closed => stats.closed += 1,
                        CloseOutcome::AlreadyTerminal => stats.skipped += 1,
                        CloseOutcome::Missing => {
                            log::warn!("Due order {order_num} not found, dropping expiry entry");
                            stats.missing += 1;
                        }
                    }
                    if let Err(e) = self.store.remove_expiry(&order_num).await {
                        log::warn!("Failed to remove expiry entry {order_num}: {e}");
                    }
                }
                Err(e) => {
                    log::error!("Failed to close expired order {order_num}: {e}");
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }
}
