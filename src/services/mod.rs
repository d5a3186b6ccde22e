pub mod catalog;
pub mod stock_ledger;
pub mod testing_requests;
