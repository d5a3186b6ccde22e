pub mod stock;
pub mod testing_requests;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::auth::SharedPermissionOracle;
use crate::events::EventSender;
use crate::services::stock_ledger::StockLedgerService;
use crate::services::testing_requests::TestingRequestService;

/// Shared service handles wired into the application state.
#[derive(Clone)]
pub struct AppServices {
    pub testing_requests: Arc<TestingRequestService>,
    pub stock: Arc<StockLedgerService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        permissions: SharedPermissionOracle,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            testing_requests: Arc::new(TestingRequestService::new(
                db.clone(),
                permissions.clone(),
                event_sender,
            )),
            stock: Arc::new(StockLedgerService::new(db, permissions)),
        }
    }
}
