//! Shared harness for integration tests: an in-memory SQLite database with
//! migrations applied, seeded catalog rows, and service handles wired to a
//! claims-backed permission oracle.

use std::sync::Arc;

use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use tokio::sync::mpsc;
use uuid::Uuid;

use labtrack_api::auth::{permissions::consts, CallerContext, ClaimsPermissionOracle};
use labtrack_api::db::{self, DbConfig, DbPool};
use labtrack_api::entities::{
    location, product, serial_record, stock_entry, LocationType, SerialStatus,
};
use labtrack_api::events::EventSender;
use labtrack_api::services::stock_ledger::StockLedgerService;
use labtrack_api::services::testing_requests::TestingRequestService;

pub struct TestApp {
    pub db: Arc<DbPool>,
    pub testing: TestingRequestService,
    pub stock: StockLedgerService,
    _event_rx: mpsc::Receiver<labtrack_api::events::Event>,
}

impl TestApp {
    /// Fresh database, migrations applied, services wired.
    pub async fn new() -> Self {
        // In-memory SQLite lives per connection: the pool must stay at one.
        let cfg = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&cfg)
            .await
            .expect("db connect");
        db::run_migrations(&pool).await.expect("migrations");

        let db = Arc::new(pool);
        let (tx, rx) = mpsc::channel(128);
        let event_sender = EventSender::new(tx);
        let permissions: labtrack_api::auth::SharedPermissionOracle =
            Arc::new(ClaimsPermissionOracle);

        let testing =
            TestingRequestService::new(db.clone(), permissions.clone(), Some(event_sender));
        let stock = StockLedgerService::new(db.clone(), permissions);

        Self {
            db,
            testing,
            stock,
            _event_rx: rx,
        }
    }

    pub async fn seed_location(&self, name: &str, location_type: LocationType) -> location::Model {
        location::ActiveModel {
            name: Set(name.to_string()),
            location_type: Set(location_type),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed location")
    }

    pub async fn seed_product(&self, sku: &str, tracks_serial: bool) -> product::Model {
        product::ActiveModel {
            sku: Set(sku.to_string()),
            name: Set(format!("Product {}", sku)),
            tracks_serial: Set(tracks_serial),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    /// Seeds an outlet ledger row with `total == available == quantity`.
    pub async fn seed_stock(
        &self,
        location: &location::Model,
        product: &product::Model,
        quantity: i32,
    ) -> stock_entry::Model {
        stock_entry::ActiveModel {
            location_id: Set(location.id),
            product_id: Set(product.id),
            total: Set(quantity),
            available: Set(quantity),
            pending_testing: Set(0),
            under_testing: Set(0),
            tested: Set(0),
            passed: Set(0),
            failed: Set(0),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed stock entry")
    }

    /// Seeds available serial records under the given ledger row.
    pub async fn seed_serials(
        &self,
        entry: &stock_entry::Model,
        serial_numbers: &[&str],
    ) -> Vec<serial_record::Model> {
        let mut records = Vec::with_capacity(serial_numbers.len());
        for serial_number in serial_numbers {
            let record = serial_record::ActiveModel {
                stock_entry_id: Set(entry.id),
                serial_number: Set(serial_number.to_string()),
                status: Set(SerialStatus::Available),
                current_location_id: Set(entry.location_id),
                original_outlet_id: Set(None),
                testing_request_id: Set(None),
                test_result: Set(None),
                test_remark: Set(None),
                tested_at: Set(None),
                tested_by: Set(None),
                ..Default::default()
            }
            .insert(&*self.db)
            .await
            .expect("seed serial");
            records.push(record);
        }
        records
    }

    /// An actor with the full testing capability set.
    pub fn actor(&self, home_location_id: Option<Uuid>) -> CallerContext {
        CallerContext::new(
            Uuid::new_v4(),
            home_location_id,
            [
                consts::TESTING_READ,
                consts::TESTING_CREATE,
                consts::TESTING_ACCEPT,
                consts::TESTING_RECORD,
                consts::TESTING_RETURN,
                consts::TESTING_CANCEL,
                consts::STOCK_READ,
            ]
            .iter()
            .map(|s| s.to_string()),
        )
    }

    /// An actor carrying no capabilities at all.
    pub fn powerless_actor(&self) -> CallerContext {
        CallerContext::new(Uuid::new_v4(), None, std::iter::empty())
    }

    /// Reloads a ledger row.
    pub async fn entry(&self, location_id: Uuid, product_id: Uuid) -> stock_entry::Model {
        stock_entry::Entity::find()
            .filter(stock_entry::Column::LocationId.eq(location_id))
            .filter(stock_entry::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await
            .expect("query entry")
            .expect("entry exists")
    }

    pub async fn maybe_entry(
        &self,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Option<stock_entry::Model> {
        stock_entry::Entity::find()
            .filter(stock_entry::Column::LocationId.eq(location_id))
            .filter(stock_entry::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await
            .expect("query entry")
    }

    /// Reloads a serial record from one location's ledger.
    pub async fn serial(
        &self,
        location_id: Uuid,
        product_id: Uuid,
        serial_number: &str,
    ) -> serial_record::Model {
        let entry = self.entry(location_id, product_id).await;
        serial_record::Entity::find()
            .filter(serial_record::Column::StockEntryId.eq(entry.id))
            .filter(serial_record::Column::SerialNumber.eq(serial_number))
            .one(&*self.db)
            .await
            .expect("query serial")
            .expect("serial exists")
    }
}
