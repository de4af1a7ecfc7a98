use actix_web::{App, HttpServer, middleware::Logger, middleware::from_fn, web};
use anyhow::Context;
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use seckill_backend::{
    config::{Config, FastStoreBackend},
    database::{create_pool, run_migrations},
    handlers,
    middlewares::{IdentityMiddleware, create_cors, rate_limit},
    services::*,
    store::{MemoryStore, RedisStore, SharedStore},
    swagger::swagger_config,
    tasks::{self, ExpiryReaper, LedgerWriter},
    utils::OrderNumGenerator,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config =
        Config::from_toml().map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    // 创建数据库连接池并迁移
    let pool = create_pool(&config.database)
        .await
        .context("Failed to create database connection pool")?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    // 快速存储
    let store: SharedStore = match config.fast_store.backend {
        FastStoreBackend::Redis => Arc::new(
            RedisStore::connect(&config.fast_store.url)
                .await
                .context("Failed to connect to Redis")?,
        ),
        FastStoreBackend::Memory => {
            log::warn!("Using in-process fast store, state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // 布隆过滤器：加载失败时从数据库重建
    let filter = ExistenceFilter::new(store.clone(), config.bloom.clone());
    filter
        .load_or_rebuild(&pool)
        .await
        .context("Failed to initialise seckill existence filter")?;

    let order_nums = OrderNumGenerator::new(config.server.node_id);
    let inventory = InventoryCache::new(
        store.clone(),
        config.seckill.purchase_marker_ttl_hours,
        config.seckill.preheat_grace_hours,
    );

    // 创建服务
    let seckill_service = SeckillService::new(
        inventory.clone(),
        filter.clone(),
        order_nums.clone(),
        config.seckill.order_expire_minutes,
    );
    let order_service = OrderService::new(
        pool.clone(),
        store.clone(),
        inventory.clone(),
        order_nums,
        config.seckill.order_expire_minutes,
    );
    let admin_service =
        AdminSeckillService::new(pool.clone(), store.clone(), inventory, filter);
    let rate_limiter = RateLimiter::new(store.clone(), config.rate_limit.clone());

    // 启动后台任务：写库消费者、超时关单、活动状态同步
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = tasks::spawn_all(
        LedgerWriter::new(pool.clone(), store.clone(), config.ledger.clone()),
        ExpiryReaper::new(store, order_service.clone(), config.reaper.clone()),
        admin_service.clone(),
        Duration::from_secs(config.seckill.status_sweep_interval_secs.max(1)),
        shutdown_rx,
    );

    // 启动HTTP服务器
    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    let admin_ids = config.admin.user_ids.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors())
            .wrap(from_fn(rate_limit))
            .wrap(IdentityMiddleware::new(admin_ids.iter().copied()))
            .app_data(web::Data::new(seckill_service.clone()))
            .app_data(web::Data::new(order_service.clone()))
            .app_data(web::Data::new(admin_service.clone()))
            .app_data(web::Data::new(rate_limiter.clone()))
            .configure(swagger_config)
            .service(
                web::scope("/api/v1")
                    .configure(handlers::seckill_config)
                    .configure(handlers::order_config)
                    .configure(handlers::admin_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    // HTTP 服务已停止，通知后台任务退出
    log::info!("HTTP server stopped, shutting down background tasks");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            log::error!("Background task ended abnormally: {e}");
        }
    }
    Ok(())
}
