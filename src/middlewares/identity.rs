use crate::error::AppError;
use actix_web::http::Method;
use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures_util::future::LocalBoxFuture;
use std::collections::HashSet;
use std::future::{Ready, ready};
use std::sync::Arc;

/// 上游认证层写入的用户 ID 请求头
pub const USER_ID_HEADER: &str = "X-User-Id";

// 路径访问规则
struct AccessRules {
    public_exact: Vec<&'static str>,
    public_prefix: Vec<&'static str>,
    /// 匿名可访问，带身份时注入用户 ID
    optional_prefix: Vec<&'static str>,
    admin_prefix: &'static str,
}

impl AccessRules {
    fn new() -> Self {
        Self {
            public_exact: vec!["/swagger-ui", "/swagger-ui/", "/api-docs/openapi.json"],
            public_prefix: vec!["/swagger-ui/", "/api-docs/"],
            optional_prefix: vec!["/api/v1/seckill/"],
            admin_prefix: "/api/v1/admin/",
        }
    }

    fn is_public(&self, path: &str) -> bool {
        self.public_exact.contains(&path)
            || self.public_prefix.iter().any(|&p| path.starts_with(p))
    }

    fn is_optional(&self, method: &Method, path: &str) -> bool {
        method == Method::GET && self.optional_prefix.iter().any(|&p| path.starts_with(p))
    }

    fn is_admin(&self, path: &str) -> bool {
        path.starts_with(self.admin_prefix)
    }
}

/// 从请求头解析调用方身份，管理端路径额外校验管理员名单
pub struct IdentityMiddleware {
    admin_ids: Arc<HashSet<i64>>,
}

impl IdentityMiddleware {
    pub fn new(admin_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            admin_ids: Arc::new(admin_ids.into_iter().collect()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IdentityMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = IdentityMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdentityMiddlewareService {
            service,
            admin_ids: self.admin_ids.clone(),
            rules: AccessRules::new(),
        }))
    }
}

pub struct IdentityMiddlewareService<S> {
    service: S,
    admin_ids: Arc<HashSet<i64>>,
    rules: AccessRules,
}

fn parse_user_id(req: &ServiceRequest) -> Result<Option<i64>, AppError> {
    let Some(raw) = req.headers().get(USER_ID_HEADER) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .map(Some)
        .ok_or_else(|| AppError::AuthError("Invalid X-User-Id header".to_string()))
}

impl<S, B> Service<ServiceRequest> for IdentityMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // 放行所有 CORS 预检请求
        if req.method() == Method::OPTIONS || self.rules.is_public(req.path()) {
            return Box::pin(self.service.call(req));
        }

        let user_id = match parse_user_id(&req) {
            Ok(id) => id,
            Err(error) => return Box::pin(async move { Err(error.into()) }),
        };

        match user_id {
            Some(id) => {
                if self.rules.is_admin(req.path()) && !self.admin_ids.contains(&id) {
                    return Box::pin(async move { Err(AppError::PermissionDenied.into()) });
                }
                req.extensions_mut().insert(id);
                Box::pin(self.service.call(req))
            }
            None if self.rules.is_optional(req.method(), req.path()) => {
                Box::pin(self.service.call(req))
            }
            None => {
                let error = AppError::AuthError("Missing X-User-Id header".to_string());
                Box::pin(async move { Err(error.into()) })
            }
        }
    }
}
