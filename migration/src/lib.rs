pub use sea_orm_migration::prelude::*;

mod m20251001_000001_create_catalog;
mod m20251001_000002_create_orders;
mod m20251001_000003_create_seckill;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251001_000001_create_catalog::Migration),
            Box::new(m20251001_000002_create_orders::Migration),
            Box::new(m20251001_000003_create_seckill::Migration),
        ]
    }
}
