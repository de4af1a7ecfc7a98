use crate::services::{RateLimitScope, RateLimiter};
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::Method;
use actix_web::middleware::Next;
use actix_web::{Error, HttpMessage, web};

/// 全局、按 IP、按用户三级滑动窗口限流；限流器不可用时放行
pub async fn rate_limit(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    if req.method() == Method::OPTIONS || !req.path().starts_with("/api/") {
        return next.call(req).await;
    }

    if let Some(limiter) = req.app_data::<web::Data<RateLimiter>>().cloned() {
        let request_id = uuid::Uuid::new_v4().to_string();
        let ip = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();
        let user_id = req.extensions().get::<i64>().copied();

        limiter
            .check(RateLimitScope::Global, "", &request_id)
            .await?;
        limiter.check(RateLimitScope::Ip, &ip, &request_id).await?;
        if let Some(uid) = user_id {
            limiter
                .check(RateLimitScope::User, &uid.to_string(), &request_id)
                .await?;
        }
    }

    next.call(req).await
}
