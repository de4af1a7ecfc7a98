use crate::config::RateLimitConfig;
use crate::error::{AppError, AppResult};
use crate::store::{SharedStore, keys};
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Global,
    Ip,
    User,
    /// 秒杀下单接口（按用户）
    SeckillUser,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitScope::Global => "global",
            RateLimitScope::Ip => "ip",
            RateLimitScope::User => "user",
            RateLimitScope::SeckillUser => "seckill_user",
        }
    }
}

/// 基于有序集合的滑动窗口限流
#[derive(Clone)]
pub struct RateLimiter {
    store: SharedStore,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: SharedStore, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn limit_for(&self, scope: RateLimitScope) -> u64 {
        match scope {
            RateLimitScope::Global => self.config.global_limit,
            RateLimitScope::Ip => self.config.ip_limit,
            RateLimitScope::User => self.config.user_limit,
            RateLimitScope::SeckillUser => self.config.seckill_user_limit,
        }
    }

    /// 返回 (是否放行, 当前计数)；存储不可用时放行
    pub async fn allow(&self, key: &str, request_id: &str, limit: u64) -> (bool, u64) {
        let now_ms = Utc::now().timestamp_millis();
        match self
            .store
            .admit_in_window(
                key,
                request_id,
                now_ms,
                self.config.window_millis as i64,
                limit,
            )
            .await
        {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Rate limiter unavailable for {key}, failing open: {e}");
                (true, 0)
            }
        }
    }

    pub async fn check(&self, scope: RateLimitScope, id: &str, request_id: &str) -> AppResult<()> {
        let key = keys::rate_limit(scope.as_str(), id);
        let (allowed, count) = self.allow(&key, request_id, self.limit_for(scope)).await;
        if allowed {
            Ok(())
        } else {
            log::debug!("Rate limited {key} (count {count})");
            Err(AppError::RateLimited(count))
        }
    }
}
