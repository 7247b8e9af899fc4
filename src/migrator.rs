use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_stock_locations_table::Migration),
            Box::new(m20240101_000002_create_catalog_items_table::Migration),
            Box::new(m20240101_000003_create_location_stock_table::Migration),
            Box::new(m20240101_000004_create_stock_ledger_entries_table::Migration),
            Box::new(m20240101_000005_create_order_stock_flags_table::Migration),
            Box::new(m20240101_000006_create_job_locks_table::Migration),
            Box::new(m20240101_000007_create_item_stock_snapshots_table::Migration),
        ]
    }
}

mod m20240101_000001_create_stock_locations_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_stock_locations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockLocations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockLocations::Id)
                                .big_integer()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StockLocations::Name).string().not_null())
                        .col(ColumnDef::new(StockLocations::Kind).string().not_null())
                        .col(
                            ColumnDef::new(StockLocations::Published)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(StockLocations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockLocations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockLocations {
        Table,
        Id,
        Name,
        Kind,
        Published,
        CreatedAt,
    }
}

mod m20240101_000002_create_catalog_items_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_catalog_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CatalogItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CatalogItems::Id)
                                .big_integer()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(CatalogItems::ParentId).big_integer().null())
                        .col(ColumnDef::new(CatalogItems::Kind).string().not_null())
                        .col(ColumnDef::new(CatalogItems::Name).string().not_null())
                        .col(
                            ColumnDef::new(CatalogItems::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(CatalogItems::AllowBackorders)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(CatalogItems::LowStockThreshold)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CatalogItems::StockStatus)
                                .string()
                                .not_null()
                                .default("out_of_stock"),
                        )
                        .col(
                            ColumnDef::new(CatalogItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_catalog_items_parent_id")
                        .table(CatalogItems::Table)
                        .col(CatalogItems::ParentId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CatalogItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CatalogItems {
        Table,
        Id,
        ParentId,
        Kind,
        Name,
        Active,
        AllowBackorders,
        LowStockThreshold,
        StockStatus,
        UpdatedAt,
    }
}

mod m20240101_000003_create_location_stock_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_location_stock_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // One row per (item, location); the composite key backs the atomic upsert
            manager
                .create_table(
                    Table::create()
                        .table(LocationStock::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(LocationStock::ItemId).big_integer().not_null())
                        .col(
                            ColumnDef::new(LocationStock::LocationId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LocationStock::Quantity)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(LocationStock::LowStockThreshold)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(LocationStock::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LocationStock::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .name("pk_location_stock")
                                .col(LocationStock::ItemId)
                                .col(LocationStock::LocationId),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_location_stock_location_id")
                        .table(LocationStock::Table)
                        .col(LocationStock::LocationId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(LocationStock::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum LocationStock {
        Table,
        ItemId,
        LocationId,
        Quantity,
        LowStockThreshold,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_stock_ledger_entries_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_stock_ledger_entries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockLedgerEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockLedgerEntries::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(StockLedgerEntries::ItemId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLedgerEntries::LocationId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLedgerEntries::Delta)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLedgerEntries::QuantityBefore)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLedgerEntries::QuantityAfter)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockLedgerEntries::Source).string().not_null())
                        .col(ColumnDef::new(StockLedgerEntries::Who).string().null())
                        .col(
                            ColumnDef::new(StockLedgerEntries::OrderReference)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(StockLedgerEntries::Meta).json().null())
                        .col(
                            ColumnDef::new(StockLedgerEntries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_ledger_item_location")
                        .table(StockLedgerEntries::Table)
                        .col(StockLedgerEntries::ItemId)
                        .col(StockLedgerEntries::LocationId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_ledger_order_reference")
                        .table(StockLedgerEntries::Table)
                        .col(StockLedgerEntries::OrderReference)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockLedgerEntries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockLedgerEntries {
        Table,
        Id,
        ItemId,
        LocationId,
        Delta,
        QuantityBefore,
        QuantityAfter,
        Source,
        Who,
        OrderReference,
        Meta,
        CreatedAt,
    }
}

mod m20240101_000005_create_order_stock_flags_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_order_stock_flags_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // The composite key makes "claim the flag" a single conflicting insert
            manager
                .create_table(
                    Table::create()
                        .table(OrderStockFlags::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OrderStockFlags::OrderId).string().not_null())
                        .col(ColumnDef::new(OrderStockFlags::Kind).string().not_null())
                        .col(
                            ColumnDef::new(OrderStockFlags::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .name("pk_order_stock_flags")
                                .col(OrderStockFlags::OrderId)
                                .col(OrderStockFlags::Kind),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderStockFlags::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderStockFlags {
        Table,
        OrderId,
        Kind,
        CreatedAt,
    }
}

mod m20240101_000006_create_job_locks_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_job_locks_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(JobLocks::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(JobLocks::Name)
                                .string()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(JobLocks::Owner).string().not_null())
                        .col(
                            ColumnDef::new(JobLocks::AcquiredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(JobLocks::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(JobLocks::CancelRequested)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(JobLocks::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum JobLocks {
        Table,
        Name,
        Owner,
        AcquiredAt,
        ExpiresAt,
        CancelRequested,
    }
}

mod m20240101_000007_create_item_stock_snapshots_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000007_create_item_stock_snapshots_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ItemStockSnapshots::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ItemStockSnapshots::ItemId)
                                .big_integer()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(ItemStockSnapshots::Total)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ItemStockSnapshots::StockStatus)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ItemStockSnapshots::ByLocationId)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ItemStockSnapshots::ByLocationName)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ItemStockSnapshots::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ItemStockSnapshots::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ItemStockSnapshots {
        Table,
        ItemId,
        Total,
        StockStatus,
        ByLocationId,
        ByLocationName,
        UpdatedAt,
    }
}
