use sea_orm_migration::prelude::*;

/// 秒杀商品表：库存热点在 Redis，这里是最终一致性的落地表
#[derive(DeriveIden)]
enum SeckillProducts {
    Table,
    Id,
    ProductId,
    SkuId,
    SeckillPrice,
    SeckillStock,
    Stock,
    LimitPerUser,
    StartTime,
    EndTime,
    Status,
    Version,
    CreatedAt,
    UpdatedAt,
}

/// 秒杀成功记录表
/// 1. 联合唯一索引防止重复购买  2. 异步写库的落脚点  3. 对账
#[derive(DeriveIden)]
enum SeckillOrders {
    Table,
    Id,
    UserId,
    SeckillProductId,
    SkuId,
    Money,
    OrderNum,
    Status,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SeckillProducts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SeckillProducts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SeckillProducts::ProductId).big_integer().not_null())
                    .col(ColumnDef::new(SeckillProducts::SkuId).big_integer().not_null())
                    .col(ColumnDef::new(SeckillProducts::SeckillPrice).big_integer().not_null())
                    .col(ColumnDef::new(SeckillProducts::SeckillStock).big_integer().not_null())
                    .col(
                        ColumnDef::new(SeckillProducts::Stock)
                            .big_integer()
                            .not_null()
                            .check(Expr::col(SeckillProducts::Stock).gte(0)),
                    )
                    .col(
                        ColumnDef::new(SeckillProducts::LimitPerUser)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(SeckillProducts::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SeckillProducts::EndTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    // 0:未开始 1:进行中 2:已结束
                    .col(ColumnDef::new(SeckillProducts::Status).integer().not_null().default(0))
                    .col(ColumnDef::new(SeckillProducts::Version).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(SeckillProducts::CreatedAt)
                            .timestamp_with_time_zone()
                            .null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SeckillProducts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SeckillOrders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SeckillOrders::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SeckillOrders::UserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(SeckillOrders::SeckillProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SeckillOrders::SkuId).big_integer().not_null())
                    .col(ColumnDef::new(SeckillOrders::Money).big_integer().not_null())
                    .col(ColumnDef::new(SeckillOrders::OrderNum).string_len(32).not_null())
                    // 0:待支付 1:已支付 2:超时取消
                    .col(ColumnDef::new(SeckillOrders::Status).integer().not_null().default(0))
                    .col(ColumnDef::new(SeckillOrders::Version).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(SeckillOrders::CreatedAt)
                            .timestamp_with_time_zone()
                            .null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SeckillOrders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // 同一用户对同一秒杀商品只能抢一次（权威约束）
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_seckill_orders_user_product_unique")
                    .table(SeckillOrders::Table)
                    .col(SeckillOrders::UserId)
                    .col(SeckillOrders::SeckillProductId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_seckill_orders_order_num")
                    .table(SeckillOrders::Table)
                    .col(SeckillOrders::OrderNum)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SeckillOrders::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SeckillProducts::Table).to_owned())
            .await
    }
}
