pub mod admin;
pub mod order;
pub mod seckill;

pub use admin::admin_config;
pub use order::order_config;
pub use seckill::seckill_config;

use crate::error::{AppError, AppResult};
use actix_web::{HttpMessage, HttpRequest};

/// 身份中间件注入的用户 ID（匿名访问时为 None）
pub(crate) fn optional_user_id(req: &HttpRequest) -> Option<i64> {
    req.extensions().get::<i64>().copied()
}

pub(crate) fn current_user_id(req: &HttpRequest) -> AppResult<i64> {
    optional_user_id(req).ok_or_else(|| AppError::AuthError("Missing X-User-Id header".into()))
}
