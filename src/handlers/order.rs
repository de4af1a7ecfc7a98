use super::current_user_id;
use crate::models::*;
use crate::services::OrderService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

#[utoipa::path(
    post,
    path = "/orders",
    tag = "order",
    request_body = CreateOrderRequest,
    security(
        ("user_id" = [])
    ),
    responses(
        (status = 200, description = "下单成功", body = CreateOrderResponse),
        (status = 400, description = "请求参数错误"),
        (status = 409, description = "库存不足或并发冲突")
    )
)]
pub async fn create_order(
    order_service: web::Data<OrderService>,
    req: HttpRequest,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse> {
    let user_id = current_user_id(&req)?;
    match order_service.create_order(user_id, body.into_inner()).await {
        Ok(resp) => Ok(HttpResponse::Ok().json(ApiResponse::success(resp))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/orders",
    tag = "order",
    params(OrderQuery),
    security(
        ("user_id" = [])
    ),
    responses(
        (status = 200, description = "获取订单列表成功", body = OrderPage),
        (status = 401, description = "未授权")
    )
)]
pub async fn get_orders(
    order_service: web::Data<OrderService>,
    req: HttpRequest,
    query: web::Query<OrderQuery>,
) -> Result<HttpResponse> {
    let user_id = current_user_id(&req)?;
    match order_service.list_orders(user_id, &query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/orders/{order_num}/pay",
    tag = "order",
    params(
        ("order_num" = String, Path, description = "订单号")
    ),
    security(
        ("user_id" = [])
    ),
    responses(
        (status = 200, description = "支付成功（模拟）", body = PayOrderResponse),
        (status = 400, description = "订单不可支付"),
        (status = 404, description = "订单不存在")
    )
)]
pub async fn pay_order(
    order_service: web::Data<OrderService>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let user_id = current_user_id(&req)?;
    match order_service.pay_order(user_id, &path).await {
        Ok(resp) => Ok(HttpResponse::Ok().json(ApiResponse::success(resp))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn order_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/orders")
            .route("", web::post().to(create_order))
            .route("", web::get().to(get_orders))
            .route("/{order_num}/pay", web::post().to(pay_order)),
    );
}
