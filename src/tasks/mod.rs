//! Background tasks for the seckill engine.
//!
//! The ledger writer, the order expiry reaper and the seckill status sweep run as
//! long-lived tokio tasks. Call `spawn_all` once during startup; flip the watch
//! channel to `true` to stop them.

pub mod expiry_reaper;
pub mod ledger_writer;

pub use expiry_reaper::{ExpiryReaper, ReapStats};
pub use ledger_writer::{LedgerStep, LedgerWriter};

use crate::services::AdminSeckillService;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// 发送端已关闭也视为停止
pub(crate) fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Spawn all background tasks and return their handles.
pub fn spawn_all(
    ledger_writer: LedgerWriter,
    expiry_reaper: ExpiryReaper,
    admin_service: AdminSeckillService,
    status_sweep_interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(3);

    handles.push(tokio::spawn(ledger_writer.run(shutdown.clone())));
    handles.push(tokio::spawn(expiry_reaper.run(shutdown.clone())));

    // 秒杀活动状态同步
    {
        let mut shutdown = shutdown;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(status_sweep_interval);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }
                if stopping(&shutdown) {
                    break;
                }
                match admin_service.sweep_statuses(Utc::now()).await {
                    Ok(n) if n > 0 => log::info!("Seckill statuses advanced: {n}"),
                    Ok(_) => {}
                    Err(e) => log::error!("Failed to sweep seckill statuses: {e}"),
                }
            }
        }));
    }

    handles
}
