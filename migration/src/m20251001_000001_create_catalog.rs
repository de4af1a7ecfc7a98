use sea_orm_migration::prelude::*;

/// 商品 SPU（目录服务只读数据，秒杀下单时用于快照）
#[derive(DeriveIden)]
enum Products {
    Table,
    Id,
    Name,
    Title,
    Info,
    ImgPath,
    Price,
    CreatedAt,
    UpdatedAt,
}

/// 商品 SKU —— 库存管理的原子单位
#[derive(DeriveIden)]
enum ProductSkus {
    Table,
    Id,
    ProductId,
    Title,
    Price,
    Stock,
    Code,
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
                    .table(Products::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Products::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Products::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Products::Title).string_len(255).not_null().default(""))
                    .col(ColumnDef::new(Products::Info).string_len(1000).not_null().default(""))
                    .col(ColumnDef::new(Products::ImgPath).string_len(512).not_null().default(""))
                    .col(ColumnDef::new(Products::Price).big_integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Products::CreatedAt)
                            .timestamp_with_time_zone()
                            .null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Products::UpdatedAt)
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
                    .table(ProductSkus::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductSkus::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProductSkus::ProductId).big_integer().not_null())
                    .col(ColumnDef::new(ProductSkus::Title).string_len(255).not_null())
                    .col(ColumnDef::new(ProductSkus::Price).big_integer().not_null())
                    // 数据库层面约束库存不能小于 0
                    .col(
                        ColumnDef::new(ProductSkus::Stock)
                            .big_integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(ProductSkus::Stock).gte(0)),
                    )
                    .col(ColumnDef::new(ProductSkus::Code).string_len(64).not_null().default(""))
                    .col(ColumnDef::new(ProductSkus::Version).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(ProductSkus::CreatedAt)
                            .timestamp_with_time_zone()
                            .null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ProductSkus::UpdatedAt)
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
                    .name("idx_product_skus_product_id")
                    .table(ProductSkus::Table)
                    .col(ProductSkus::ProductId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProductSkus::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Products::Table).to_owned())
            .await
    }
}
