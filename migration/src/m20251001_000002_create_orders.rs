use sea_orm_migration::prelude::*;

/// 订单主表（普通订单与秒杀订单共用）
#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    UserId,
    OrderNum,
    AllPrice,
    OrderStatus,
    OrderType,
    AddressId,
    Remark,
    ExpireTime,
    PayTime,
    CancelTime,
    Version,
    CreatedAt,
    UpdatedAt,
}

/// 订单详情表（购买时的商品快照）
#[derive(DeriveIden)]
enum OrderItems {
    Table,
    Id,
    OrderNum,
    ProductId,
    ProductSkuId,
    Num,
    Price,
    Title,
    ImgPath,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Orders::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Orders::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Orders::OrderNum).string_len(32).not_null())
                    .col(ColumnDef::new(Orders::AllPrice).big_integer().not_null())
                    // 0:待支付 1:已支付 2:已发货 3:已完成 4:已取消
                    .col(ColumnDef::new(Orders::OrderStatus).integer().not_null().default(0))
                    // 1:普通订单 2:秒杀订单
                    .col(ColumnDef::new(Orders::OrderType).integer().not_null().default(1))
                    .col(ColumnDef::new(Orders::AddressId).big_integer().null())
                    .col(ColumnDef::new(Orders::Remark).string_len(512).not_null().default(""))
                    .col(
                        ColumnDef::new(Orders::ExpireTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Orders::PayTime).timestamp_with_time_zone().null())
                    .col(ColumnDef::new(Orders::CancelTime).timestamp_with_time_zone().null())
                    .col(ColumnDef::new(Orders::Version).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Orders::CreatedAt)
                            .timestamp_with_time_zone()
                            .null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Orders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_orders_order_num_unique")
                    .table(Orders::Table)
                    .col(Orders::OrderNum)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_orders_user_id")
                    .table(Orders::Table)
                    .col(Orders::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OrderItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrderItems::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OrderItems::OrderNum).string_len(32).not_null())
                    .col(ColumnDef::new(OrderItems::ProductId).big_integer().not_null())
                    .col(ColumnDef::new(OrderItems::ProductSkuId).big_integer().not_null())
                    .col(ColumnDef::new(OrderItems::Num).integer().not_null())
                    .col(ColumnDef::new(OrderItems::Price).big_integer().not_null())
                    .col(ColumnDef::new(OrderItems::Title).string_len(512).not_null())
                    .col(ColumnDef::new(OrderItems::ImgPath).string_len(512).not_null().default(""))
                    .col(
                        ColumnDef::new(OrderItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // 一个订单可以有多个商品，普通索引
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_order_items_order_num")
                    .table(OrderItems::Table)
                    .col(OrderItems::OrderNum)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OrderItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await
    }
}
