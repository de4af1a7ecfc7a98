use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::{OrderStatus, OrderType, SeckillStatus};
use crate::handlers;
use crate::middlewares::USER_ID_HEADER;
use crate::models::*;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "user_id",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(USER_ID_HEADER))),
        )
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::seckill::list_seckill,
        handlers::seckill::get_seckill_detail,
        handlers::seckill::create_seckill_order,
        handlers::order::create_order,
        handlers::order::get_orders,
        handlers::order::pay_order,
        handlers::admin::create_seckill_product,
        handlers::admin::delete_seckill_product,
        handlers::admin::update_seckill_status,
        handlers::admin::preheat_seckill_product,
        handlers::admin::list_dead_letters,
    ),
    components(
        schemas(
            SeckillStatus,
            OrderStatus,
            OrderType,
            SeckillListItem,
            SeckillListPage,
            SeckillDetail,
            CreateSeckillOrderRequest,
            CreateSeckillOrderResponse,
            CreateSeckillProductRequest,
            UpdateSeckillStatusRequest,
            SeckillProductResponse,
            PreheatResponse,
            QueueTask,
            DeadLetterResponse,
            DeadLetterPage,
            OrderItemRequest,
            CreateOrderRequest,
            CreateOrderResponse,
            OrderItemResponse,
            OrderResponse,
            OrderPage,
            PayOrderResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "seckill", description = "Flash sale API"),
        (name = "order", description = "Order API"),
        (name = "admin", description = "Flash sale administration API"),
    ),
    info(
        title = "Seckill Backend API",
        version = "0.1.0",
        description = "Flash sale engine REST API documentation"
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_seckill_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/seckill/order"));
        assert!(doc.paths.paths.contains_key("/admin/seckill/{id}/preheat"));
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("user_id"));
    }
}
