// `async_trait` desugars the `MigrationTrait` methods with late-bound
// lifetimes, so the `&SchemaManager` parameter cannot carry an explicit
// `<'_>` without triggering E0195. Allow the elided-lifetime idiom lint
// here to coexist with the crate-wide `deny(rust_2018_idioms)`.
#![allow(elided_lifetimes_in_paths)]

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_catalog_tables::Migration),
            Box::new(m20240101_000002_create_stock_tables::Migration),
            Box::new(m20240101_000003_create_testing_request_tables::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Products::Sku)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(
                            ColumnDef::new(Products::TracksSerial)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Products::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Products::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Locations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Locations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Locations::Name).string().not_null())
                        .col(ColumnDef::new(Locations::LocationType).string().not_null())
                        .col(ColumnDef::new(Locations::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Locations::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Locations::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Sku,
        Name,
        TracksSerial,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Locations {
        Table,
        Id,
        Name,
        LocationType,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_stock_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_stock_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockEntries::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockEntries::LocationId).uuid().not_null())
                        .col(ColumnDef::new(StockEntries::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockEntries::Total)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockEntries::Available)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockEntries::PendingTesting)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockEntries::UnderTesting)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockEntries::Tested)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockEntries::Passed)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockEntries::Failed)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockEntries::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockEntries::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One ledger row per (location, product)
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_stock_entries_location_product")
                        .table(StockEntries::Table)
                        .col(StockEntries::LocationId)
                        .col(StockEntries::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SerialRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SerialRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SerialRecords::StockEntryId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SerialRecords::SerialNumber)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SerialRecords::Status).string().not_null())
                        .col(
                            ColumnDef::new(SerialRecords::CurrentLocationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SerialRecords::OriginalOutletId).uuid())
                        .col(ColumnDef::new(SerialRecords::TestingRequestId).uuid())
                        .col(ColumnDef::new(SerialRecords::TestResult).string())
                        .col(ColumnDef::new(SerialRecords::TestRemark).string())
                        .col(ColumnDef::new(SerialRecords::TestedAt).timestamp())
                        .col(ColumnDef::new(SerialRecords::TestedBy).uuid())
                        .col(
                            ColumnDef::new(SerialRecords::TransferHistory)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SerialRecords::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SerialRecords::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Serial numbers are unique within one ledger row
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_serial_records_entry_serial")
                        .table(SerialRecords::Table)
                        .col(SerialRecords::StockEntryId)
                        .col(SerialRecords::SerialNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_serial_records_status")
                        .table(SerialRecords::Table)
                        .col(SerialRecords::Status)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SerialRecords::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StockEntries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum StockEntries {
        Table,
        Id,
        LocationId,
        ProductId,
        Total,
        Available,
        PendingTesting,
        UnderTesting,
        Tested,
        Passed,
        Failed,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum SerialRecords {
        Table,
        Id,
        StockEntryId,
        SerialNumber,
        Status,
        CurrentLocationId,
        OriginalOutletId,
        TestingRequestId,
        TestResult,
        TestRemark,
        TestedAt,
        TestedBy,
        TransferHistory,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_testing_request_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_testing_request_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(TestingRequests::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TestingRequests::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestingRequests::RequestNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(TestingRequests::FromLocationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestingRequests::ToLocationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TestingRequests::Status).string().not_null())
                        .col(
                            ColumnDef::new(TestingRequests::RequestedBy)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestingRequests::RequestedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TestingRequests::AcceptedBy).uuid())
                        .col(ColumnDef::new(TestingRequests::AcceptedAt).timestamp())
                        .col(ColumnDef::new(TestingRequests::CompletedBy).uuid())
                        .col(ColumnDef::new(TestingRequests::CompletedAt).timestamp())
                        .col(ColumnDef::new(TestingRequests::CancelledBy).uuid())
                        .col(ColumnDef::new(TestingRequests::CancelledAt).timestamp())
                        .col(
                            ColumnDef::new(TestingRequests::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestingRequests::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_testing_requests_status")
                        .table(TestingRequests::Table)
                        .col(TestingRequests::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(TestingRequestLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TestingRequestLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestingRequestLines::RequestId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestingRequestLines::LineNo)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestingRequestLines::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestingRequestLines::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestingRequestLines::SerialNumbers)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestingRequestLines::SerialStates)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestingRequestLines::PassedQty)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(TestingRequestLines::FailedQty)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(TestingRequestLines::TestedQty)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(TestingRequestLines::Remark).string())
                        .col(
                            ColumnDef::new(TestingRequestLines::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TestingRequestLines::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_testing_request_lines_request")
                        .table(TestingRequestLines::Table)
                        .col(TestingRequestLines::RequestId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(TestingRequestLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(TestingRequests::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum TestingRequests {
        Table,
        Id,
        RequestNumber,
        FromLocationId,
        ToLocationId,
        Status,
        RequestedBy,
        RequestedAt,
        AcceptedBy,
        AcceptedAt,
        CompletedBy,
        CompletedAt,
        CancelledBy,
        CancelledAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum TestingRequestLines {
        Table,
        Id,
        RequestId,
        LineNo,
        ProductId,
        Quantity,
        SerialNumbers,
        SerialStates,
        PassedQty,
        FailedQty,
        TestedQty,
        Remark,
        CreatedAt,
        UpdatedAt,
    }
}
