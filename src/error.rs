use crate::store::StoreError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// 稳定的业务错误码（与前端约定，不可随意修改）
pub mod codes {
    pub const OK: u32 = 200;
    pub const SERVER_COMMON_ERROR: u32 = 100001;
    pub const REQUEST_PARAM_ERROR: u32 = 100002;
    pub const DB_ERROR: u32 = 100004;
    pub const TOO_MANY_REQUESTS: u32 = 100005;
    pub const USER_NOT_LOGIN: u32 = 200007;
    pub const PERMISSION_DENIED: u32 = 200013;
    pub const NOT_FOUND: u32 = 400001;
    pub const DUPLICATE_PURCHASE: u32 = 400002;
    pub const SOLD_OUT: u32 = 400003;
    pub const NOT_IN_SALE_WINDOW: u32 = 400004;
    pub const ALREADY_PREHEATED: u32 = 400005;
    pub const VERSION_CONFLICT: u32 = 400006;
    pub const LEDGER_FATAL: u32 = 500001;
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Fast store unavailable: {0}")]
    Transient(#[from] StoreError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate purchase")]
    DuplicatePurchase,

    #[error("Sold out")]
    SoldOut,

    #[error("Seckill not in sale window")]
    NotInSaleWindow,

    #[error("Seckill product {0} already preheated")]
    AlreadyPreheated(i64),

    #[error("Version conflict: {0}")]
    VersionConflict(String),

    #[error("Too many requests (current: {0})")]
    RateLimited(u64),

    #[error("Auth error: {0}")]
    AuthError(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Ledger persistence failed permanently: {0}")]
    FatalPersistence(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl AppError {
    /// 业务错误码
    pub fn code(&self) -> u32 {
        match self {
            AppError::ValidationError(_) => codes::REQUEST_PARAM_ERROR,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::DuplicatePurchase => codes::DUPLICATE_PURCHASE,
            AppError::SoldOut => codes::SOLD_OUT,
            AppError::NotInSaleWindow => codes::NOT_IN_SALE_WINDOW,
            AppError::AlreadyPreheated(_) => codes::ALREADY_PREHEATED,
            AppError::VersionConflict(_) => codes::VERSION_CONFLICT,
            AppError::RateLimited(_) => codes::TOO_MANY_REQUESTS,
            AppError::AuthError(_) => codes::USER_NOT_LOGIN,
            AppError::PermissionDenied => codes::PERMISSION_DENIED,
            AppError::DatabaseError(_) => codes::DB_ERROR,
            AppError::FatalPersistence(_) => codes::LEDGER_FATAL,
            AppError::Transient(_) | AppError::InternalError(_) | AppError::SerdeJsonError(_) => {
                codes::SERVER_COMMON_ERROR
            }
        }
    }

    /// 面向用户的提示信息；内部错误不外泄细节
    pub fn user_message(&self) -> String {
        match self {
            AppError::ValidationError(msg) | AppError::NotFound(msg) => msg.clone(),
            AppError::DuplicatePurchase => "请勿重复下单".to_string(),
            AppError::SoldOut => "库存不足".to_string(),
            AppError::NotInSaleWindow => "秒杀活动未开始或已结束".to_string(),
            AppError::AlreadyPreheated(_) => "秒杀商品已预热".to_string(),
            AppError::VersionConflict(_) => "数据已变更，请刷新后重试".to_string(),
            AppError::RateLimited(count) => format!("请求过于频繁，请稍后重试（当前: {count}）"),
            AppError::AuthError(msg) => msg.clone(),
            AppError::PermissionDenied => "Permission denied".to_string(),
            AppError::DatabaseError(_) => "数据库繁忙,请稍后再试".to_string(),
            _ => "系统错误，请稍后重试".to_string(),
        }
    }

    /// 可重试的瞬时错误，写库消费者据此决定退避重试还是直接转入死信
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_) | AppError::DatabaseError(_))
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::NotInSaleWindow => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicatePurchase
            | AppError::SoldOut
            | AppError::AlreadyPreheated(_)
            | AppError::VersionConflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied => StatusCode::FORBIDDEN,
            AppError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::ValidationError(msg) => log::warn!("Validation error: {msg}"),
            AppError::AuthError(msg) => log::warn!("Authentication error: {msg}"),
            AppError::PermissionDenied => log::warn!("Permission denied"),
            AppError::NotFound(_)
            | AppError::DuplicatePurchase
            | AppError::SoldOut
            | AppError::NotInSaleWindow
            | AppError::AlreadyPreheated(_)
            | AppError::VersionConflict(_)
            | AppError::RateLimited(_) => {}
            AppError::DatabaseError(err) => log::error!("Database error: {err}"),
            AppError::Transient(err) => log::error!("Fast store error: {err}"),
            _ => log::error!("Internal error: {self}"),
        }

        HttpResponse::build(self.status_code()).json(json!({
            "code": self.code(),
            "msg": self.user_message(),
            "data": null
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_and_sold_out_are_distinguished() {
        assert_ne!(AppError::DuplicatePurchase.code(), AppError::SoldOut.code());
        assert_eq!(AppError::SoldOut.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = AppError::InternalError("secret connection string".into());
        assert!(!err.user_message().contains("secret"));
        assert_eq!(err.code(), codes::SERVER_COMMON_ERROR);
    }

    #[test]
    fn test_transient_classification() {
        let err = AppError::from(StoreError::UnexpectedReply("reserve returned 9".into()));
        assert!(err.is_transient());
        assert!(!AppError::SoldOut.is_transient());
        assert!(!AppError::NotFound("seckill product 1".into()).is_transient());
    }
}
