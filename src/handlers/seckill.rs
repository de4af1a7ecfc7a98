use super::{current_user_id, optional_user_id};
use crate::models::*;
use crate::services::{RateLimitScope, RateLimiter, SeckillService};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

#[utoipa::path(
    get,
    path = "/seckill/list",
    tag = "seckill",
    params(PaginationParams),
    responses(
        (status = 200, description = "进行中及即将开始的秒杀商品", body = SeckillListPage)
    )
)]
pub async fn list_seckill(
    seckill_service: web::Data<SeckillService>,
    query: web::Query<PaginationParams>,
) -> Result<HttpResponse> {
    match seckill_service.list(&query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/seckill/{id}",
    tag = "seckill",
    params(
        ("id" = i64, Path, description = "秒杀商品 ID")
    ),
    responses(
        (status = 200, description = "秒杀商品详情", body = SeckillDetail),
        (status = 404, description = "秒杀商品不存在")
    )
)]
pub async fn get_seckill_detail(
    seckill_service: web::Data<SeckillService>,
    req: HttpRequest,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let user_id = optional_user_id(&req);
    match seckill_service.detail(user_id, path.into_inner()).await {
        Ok(detail) => Ok(HttpResponse::Ok().json(ApiResponse::success(detail))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/seckill/order",
    tag = "seckill",
    request_body = CreateSeckillOrderRequest,
    security(
        ("user_id" = [])
    ),
    responses(
        (status = 200, description = "抢购成功，订单异步落库", body = CreateSeckillOrderResponse),
        (status = 400, description = "活动未开始或已结束"),
        (status = 404, description = "秒杀商品不存在"),
        (status = 409, description = "重复购买或库存不足"),
        (status = 429, description = "请求过于频繁")
    )
)]
pub async fn create_seckill_order(
    seckill_service: web::Data<SeckillService>,
    limiter: web::Data<RateLimiter>,
    req: HttpRequest,
    body: web::Json<CreateSeckillOrderRequest>,
) -> Result<HttpResponse> {
    let user_id = current_user_id(&req)?;
    let request_id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = limiter
        .check(RateLimitScope::SeckillUser, &user_id.to_string(), &request_id)
        .await
    {
        return Ok(e.error_response());
    }

    match seckill_service
        .create_order(user_id, body.into_inner())
        .await
    {
        Ok(resp) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(resp, "抢购成功"))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn seckill_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/seckill")
            .route("/list", web::get().to(list_seckill))
            .route("/order", web::post().to(create_seckill_order))
            .route("/{id}", web::get().to(get_seckill_detail)),
    );
}
