use crate::models::*;
use crate::services::AdminSeckillService;
use actix_web::{HttpResponse, ResponseError, Result, web};

#[utoipa::path(
    post,
    path = "/admin/seckill",
    tag = "admin",
    request_body = CreateSeckillProductRequest,
    security(
        ("user_id" = [])
    ),
    responses(
        (status = 200, description = "创建秒杀商品成功", body = SeckillProductResponse),
        (status = 400, description = "请求参数错误"),
        (status = 403, description = "无权限")
    )
)]
pub async fn create_seckill_product(
    admin_service: web::Data<AdminSeckillService>,
    body: web::Json<CreateSeckillProductRequest>,
) -> Result<HttpResponse> {
    match admin_service.create(body.into_inner()).await {
        Ok(resp) => Ok(HttpResponse::Ok().json(ApiResponse::success(resp))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    delete,
    path = "/admin/seckill/{id}",
    tag = "admin",
    params(
        ("id" = i64, Path, description = "秒杀商品 ID")
    ),
    security(
        ("user_id" = [])
    ),
    responses(
        (status = 200, description = "删除成功"),
        (status = 404, description = "秒杀商品不存在")
    )
)]
pub async fn delete_seckill_product(
    admin_service: web::Data<AdminSeckillService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    match admin_service.delete(path.into_inner()).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success(()))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    put,
    path = "/admin/seckill/{id}/status",
    tag = "admin",
    params(
        ("id" = i64, Path, description = "秒杀商品 ID")
    ),
    request_body = UpdateSeckillStatusRequest,
    security(
        ("user_id" = [])
    ),
    responses(
        (status = 200, description = "状态已更新", body = SeckillProductResponse),
        (status = 409, description = "版本冲突")
    )
)]
pub async fn update_seckill_status(
    admin_service: web::Data<AdminSeckillService>,
    path: web::Path<i64>,
    body: web::Json<UpdateSeckillStatusRequest>,
) -> Result<HttpResponse> {
    match admin_service
        .set_status(path.into_inner(), body.into_inner().status)
        .await
    {
        Ok(resp) => Ok(HttpResponse::Ok().json(ApiResponse::success(resp))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/admin/seckill/{id}/preheat",
    tag = "admin",
    params(
        ("id" = i64, Path, description = "秒杀商品 ID")
    ),
    security(
        ("user_id" = [])
    ),
    responses(
        (status = 200, description = "预热成功", body = PreheatResponse),
        (status = 400, description = "状态或库存不满足预热条件"),
        (status = 409, description = "已预热")
    )
)]
pub async fn preheat_seckill_product(
    admin_service: web::Data<AdminSeckillService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    match admin_service.preheat(path.into_inner()).await {
        Ok(resp) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(resp, "预热成功"))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/admin/seckill/dead-letters",
    tag = "admin",
    params(PaginationParams),
    security(
        ("user_id" = [])
    ),
    responses(
        (status = 200, description = "写库失败的秒杀订单", body = DeadLetterPage)
    )
)]
pub async fn list_dead_letters(
    admin_service: web::Data<AdminSeckillService>,
    query: web::Query<PaginationParams>,
) -> Result<HttpResponse> {
    match admin_service.dead_letters(&query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn admin_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin/seckill")
            .route("", web::post().to(create_seckill_product))
            .route("/dead-letters", web::get().to(list_dead_letters))
            .route("/{id}", web::delete().to(delete_seckill_product))
            .route("/{id}/status", web::put().to(update_seckill_status))
            .route("/{id}/preheat", web::post().to(preheat_seckill_product)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middlewares::{IdentityMiddleware, USER_ID_HEADER};
    use crate::test_support::Harness;
    use actix_web::{App, test};
    use chrono::{Duration, Utc};
    use serde_json::Value;

    #[actix_web::test]
    async fn test_preheat_twice_conflicts() {
        let h = Harness::new().await;
        let (product_id, sku_id) = h.seed_product(10).await;
        let now = Utc::now();
        let seckill = h
            .seed_seckill(product_id, sku_id, 3, now, now + Duration::hours(1))
            .await;
        let app = test::init_service(
            App::new()
                .wrap(IdentityMiddleware::new([1]))
                .app_data(web::Data::new(h.admin.clone()))
                .service(web::scope("/api/v1").configure(admin_config)),
        )
        .await;

        let preheat = || {
            test::TestRequest::post()
                .uri(&format!("/api/v1/admin/seckill/{}/preheat", seckill.id))
                .insert_header((USER_ID_HEADER, "1"))
                .to_request()
        };
        let resp = test::call_service(&app, preheat()).await;
        assert_eq!(resp.status(), 200);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["stock"], 3);

        let resp = test::call_service(&app, preheat()).await;
        assert_eq!(resp.status(), 409);

        let req = test::TestRequest::get()
            .uri("/api/v1/admin/seckill/dead-letters")
            .insert_header((USER_ID_HEADER, "1"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 0);
    }
}
