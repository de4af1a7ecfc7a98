use actix_cors::Cors;

pub fn create_cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        // 身份由上游网关通过 X-User-Id 传入
        .allow_any_header()
        .max_age(3600)
}
