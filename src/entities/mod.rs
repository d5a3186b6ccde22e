pub mod location;
pub mod product;
pub mod serial_record;
pub mod stock_entry;
pub mod testing_request;
pub mod testing_request_line;

pub use location::LocationType;
pub use serial_record::{SerialStatus, TestOutcome, TransferEvent, TransferType};
pub use testing_request::RequestStatus;
