//! The stock ledger state machine.
//!
//! Every mutation here runs against a caller-supplied transaction so the
//! workflow engine can compose several ledger operations atomically. Each
//! operation is split into an `ensure_*` precondition check (read-only) and
//! an applying function, letting the engine validate every line of a request
//! before mutating any of them. Applying functions still guard their writes
//! with status-conditional updates: a reservation or commit that lost a race
//! since validation fails cleanly instead of double-applying.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::auth::permissions::{Actions, Modules};
use crate::auth::{CallerContext, SharedPermissionOracle};
use crate::entities::serial_record::{self, encode_history};
use crate::entities::{stock_entry, SerialStatus, TestOutcome, TransferEvent, TransferType};
use crate::errors::ServiceError;

/// Find the ledger row for a (location, product) pair.
pub async fn find_entry(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
) -> Result<Option<stock_entry::Model>, ServiceError> {
    stock_entry::Entity::find()
        .filter(stock_entry::Column::LocationId.eq(location_id))
        .filter(stock_entry::Column::ProductId.eq(product_id))
        .one(txn)
        .await
        .map_err(ServiceError::db_error)
}

async fn require_entry(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
) -> Result<stock_entry::Model, ServiceError> {
    find_entry(txn, location_id, product_id).await?.ok_or_else(|| {
        ServiceError::NotFound(format!(
            "No stock entry for product {} at location {}",
            product_id, location_id
        ))
    })
}

async fn find_serial(
    txn: &DatabaseTransaction,
    stock_entry_id: Uuid,
    serial_number: &str,
) -> Result<Option<serial_record::Model>, ServiceError> {
    serial_record::Entity::find()
        .filter(serial_record::Column::StockEntryId.eq(stock_entry_id))
        .filter(serial_record::Column::SerialNumber.eq(serial_number))
        .one(txn)
        .await
        .map_err(ServiceError::db_error)
}

async fn require_serial(
    txn: &DatabaseTransaction,
    entry: &stock_entry::Model,
    serial_number: &str,
) -> Result<serial_record::Model, ServiceError> {
    find_serial(txn, entry.id, serial_number).await?.ok_or_else(|| {
        ServiceError::NotFound(format!(
            "Serial {} not found at location {}",
            serial_number, entry.location_id
        ))
    })
}

fn outcome_column(result: TestOutcome) -> stock_entry::Column {
    match result {
        TestOutcome::Passed => stock_entry::Column::Passed,
        TestOutcome::Failed => stock_entry::Column::Failed,
        TestOutcome::Tested => stock_entry::Column::Tested,
    }
}

/// Applies counter deltas in a single atomic update. Every decremented
/// counter carries a `>= delta` guard filter, so a write that would take any
/// counter negative affects zero rows and surfaces as `InsufficientStock`.
async fn apply_counter_deltas(
    txn: &DatabaseTransaction,
    entry_id: Uuid,
    deltas: &[(stock_entry::Column, i32)],
    context: &str,
) -> Result<(), ServiceError> {
    let mut update = stock_entry::Entity::update_many()
        .col_expr(stock_entry::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(stock_entry::Column::Id.eq(entry_id));
    for (col, delta) in deltas {
        update = update.col_expr(*col, Expr::col(*col).add(*delta));
        if *delta < 0 {
            update = update.filter(col.gte(-*delta));
        }
    }
    let res = update.exec(txn).await.map_err(ServiceError::db_error)?;
    if res.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock(context.to_string()));
    }
    Ok(())
}

/// Status-guarded serial update. Returns the number of rows affected; zero
/// means the serial no longer carries the expected status.
async fn update_serial_guarded(
    txn: &DatabaseTransaction,
    serial_id: Uuid,
    expected: SerialStatus,
    new_status: SerialStatus,
    new_location: Option<Uuid>,
    new_history: serde_json::Value,
) -> Result<u64, ServiceError> {
    let mut update = serial_record::Entity::update_many()
        .col_expr(serial_record::Column::Status, Expr::value(new_status))
        .col_expr(
            serial_record::Column::TransferHistory,
            Expr::value(new_history),
        )
        .col_expr(serial_record::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(serial_record::Column::Id.eq(serial_id))
        .filter(serial_record::Column::Status.eq(expected));
    if let Some(location) = new_location {
        update = update.col_expr(
            serial_record::Column::CurrentLocationId,
            Expr::value(location),
        );
    }
    let res = update.exec(txn).await.map_err(ServiceError::db_error)?;
    Ok(res.rows_affected)
}

fn appended_history(
    serial: &serial_record::Model,
    event: TransferEvent,
) -> Result<serde_json::Value, ServiceError> {
    let mut history = serial.history()?;
    history.push(event);
    Ok(encode_history(&history)?)
}

/// Rewrites the LAST transfer-history entry's status/result in place.
/// Recording a result never adds a hop; the unit has not moved.
fn stamped_history(
    serial: &serial_record::Model,
    status: SerialStatus,
    result: Option<TestOutcome>,
) -> Result<serde_json::Value, ServiceError> {
    let mut history = serial.history()?;
    if let Some(last) = history.last_mut() {
        last.status = status;
        if result.is_some() {
            last.test_result = result;
        }
    }
    Ok(encode_history(&history)?)
}

/// Read-only precondition check for `reserve_for_testing`.
pub async fn ensure_reserve_preconditions(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
    tracks_serial: bool,
    qty: i32,
    serials: &[String],
) -> Result<stock_entry::Model, ServiceError> {
    let entry = require_entry(txn, location_id, product_id).await?;
    if tracks_serial {
        for serial_number in serials {
            let serial = find_serial(txn, entry.id, serial_number).await?.ok_or_else(|| {
                ServiceError::SerialUnavailable(format!(
                    "Serial {} does not exist at location {}",
                    serial_number, location_id
                ))
            })?;
            if serial.status != SerialStatus::Available
                || serial.current_location_id != location_id
            {
                return Err(ServiceError::SerialUnavailable(format!(
                    "Serial {} of product {} is not available for testing",
                    serial_number, product_id
                )));
            }
        }
    } else if entry.available < qty {
        return Err(ServiceError::InsufficientStock(format!(
            "Product {} at location {} has {} available, requested {}",
            product_id, location_id, entry.available, qty
        )));
    }
    Ok(entry)
}

/// Soft hold on outlet stock. Serialized units flip to `pending_testing`
/// with a transfer-history entry; non-serialized stock bumps the
/// `pending_testing` counter. `available` is deliberately NOT decremented
/// here: a reservation is advisory until the testing center accepts, and
/// must not block other outlet operations on the same stock.
#[instrument(skip(txn, serials), fields(serial_count = serials.len()))]
pub async fn reserve_for_testing(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
    tracks_serial: bool,
    qty: i32,
    serials: &[String],
    destination_id: Uuid,
) -> Result<(), ServiceError> {
    let entry =
        ensure_reserve_preconditions(txn, location_id, product_id, tracks_serial, qty, serials)
            .await?;

    if tracks_serial {
        for serial_number in serials {
            let serial = require_serial(txn, &entry, serial_number).await?;
            let history = appended_history(
                &serial,
                TransferEvent {
                    from_location: location_id,
                    to_location: destination_id,
                    date: Utc::now(),
                    transfer_type: TransferType::OutletToTesting,
                    status: SerialStatus::PendingTesting,
                    test_result: None,
                },
            )?;
            let claimed = update_serial_guarded(
                txn,
                serial.id,
                SerialStatus::Available,
                SerialStatus::PendingTesting,
                None,
                history,
            )
            .await?;
            if claimed == 0 {
                // Another request won this serial between validation and apply.
                return Err(ServiceError::SerialUnavailable(format!(
                    "Serial {} of product {} was reserved by another request",
                    serial_number, product_id
                )));
            }
        }
    } else {
        apply_counter_deltas(
            txn,
            entry.id,
            &[(stock_entry::Column::PendingTesting, qty)],
            "reserve",
        )
        .await?;
    }
    Ok(())
}

/// Read-only precondition check for `commit_to_testing`.
pub async fn ensure_commit_preconditions(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
    tracks_serial: bool,
    qty: i32,
    serials: &[String],
) -> Result<stock_entry::Model, ServiceError> {
    let entry = require_entry(txn, location_id, product_id).await?;
    if entry.available < qty {
        return Err(ServiceError::InsufficientStock(format!(
            "Product {} at location {} has {} available, cannot commit {}",
            product_id, location_id, entry.available, qty
        )));
    }
    if tracks_serial {
        for serial_number in serials {
            let serial = require_serial(txn, &entry, serial_number).await?;
            if serial.status != SerialStatus::PendingTesting {
                return Err(ServiceError::SerialUnavailable(format!(
                    "Serial {} of product {} is no longer pending testing",
                    serial_number, product_id
                )));
            }
        }
    } else if entry.pending_testing < qty {
        return Err(ServiceError::InsufficientStock(format!(
            "Product {} at location {} has only {} pending testing, cannot commit {}",
            product_id, location_id, entry.pending_testing, qty
        )));
    }
    Ok(entry)
}

/// The real stock draw-down, run when the testing center accepts. Decrements
/// `available`; serialized units flip to `under_testing` and record the
/// destination as their current location.
#[instrument(skip(txn, serials), fields(serial_count = serials.len()))]
pub async fn commit_to_testing(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
    tracks_serial: bool,
    qty: i32,
    serials: &[String],
    destination_id: Uuid,
) -> Result<(), ServiceError> {
    let entry =
        ensure_commit_preconditions(txn, location_id, product_id, tracks_serial, qty, serials)
            .await?;

    if tracks_serial {
        for serial_number in serials {
            let serial = require_serial(txn, &entry, serial_number).await?;
            let history = appended_history(
                &serial,
                TransferEvent {
                    from_location: location_id,
                    to_location: destination_id,
                    date: Utc::now(),
                    transfer_type: TransferType::OutletToTesting,
                    status: SerialStatus::UnderTesting,
                    test_result: None,
                },
            )?;
            let claimed = update_serial_guarded(
                txn,
                serial.id,
                SerialStatus::PendingTesting,
                SerialStatus::UnderTesting,
                Some(destination_id),
                history,
            )
            .await?;
            if claimed == 0 {
                return Err(ServiceError::SerialUnavailable(format!(
                    "Serial {} of product {} is no longer pending testing",
                    serial_number, product_id
                )));
            }
        }
        apply_counter_deltas(
            txn,
            entry.id,
            &[(stock_entry::Column::Available, -qty)],
            "commit available",
        )
        .await?;
    } else {
        apply_counter_deltas(
            txn,
            entry.id,
            &[
                (stock_entry::Column::Available, -qty),
                (stock_entry::Column::PendingTesting, -qty),
            ],
            "commit",
        )
        .await?;
    }
    Ok(())
}

/// Read-only precondition check for `receive_for_testing`: no incoming
/// serial may already exist in the destination ledger.
pub async fn ensure_receive_preconditions(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
    serials: &[String],
) -> Result<(), ServiceError> {
    if serials.is_empty() {
        return Ok(());
    }
    if let Some(entry) = find_entry(txn, location_id, product_id).await? {
        for serial_number in serials {
            if find_serial(txn, entry.id, serial_number).await?.is_some() {
                return Err(ServiceError::DuplicateSerial(format!(
                    "Serial {} of product {} already exists at location {}",
                    serial_number, product_id, location_id
                )));
            }
        }
    }
    Ok(())
}

/// Books received units into the destination (testing-center) ledger:
/// create the entry if absent, else merge by incrementing `total`,
/// `available` and `under_testing`. New serial records carry the original
/// outlet, the owning request, and an opening transfer-history entry.
#[instrument(skip(txn, serials), fields(serial_count = serials.len()))]
pub async fn receive_for_testing(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
    qty: i32,
    serials: &[String],
    original_outlet_id: Uuid,
    request_id: Uuid,
) -> Result<(), ServiceError> {
    ensure_receive_preconditions(txn, location_id, product_id, serials).await?;

    let entry = match find_entry(txn, location_id, product_id).await? {
        Some(existing) => {
            apply_counter_deltas(
                txn,
                existing.id,
                &[
                    (stock_entry::Column::Total, qty),
                    (stock_entry::Column::Available, qty),
                    (stock_entry::Column::UnderTesting, qty),
                ],
                "receive",
            )
            .await?;
            existing
        }
        None => {
            let fresh = stock_entry::ActiveModel {
                location_id: Set(location_id),
                product_id: Set(product_id),
                total: Set(qty),
                available: Set(qty),
                pending_testing: Set(0),
                under_testing: Set(qty),
                tested: Set(0),
                passed: Set(0),
                failed: Set(0),
                ..Default::default()
            };
            fresh.insert(txn).await.map_err(ServiceError::db_error)?
        }
    };

    for serial_number in serials {
        let opening = vec![TransferEvent {
            from_location: original_outlet_id,
            to_location: location_id,
            date: Utc::now(),
            transfer_type: TransferType::OutletToTesting,
            status: SerialStatus::UnderTesting,
            test_result: None,
        }];
        let record = serial_record::ActiveModel {
            stock_entry_id: Set(entry.id),
            serial_number: Set(serial_number.clone()),
            status: Set(SerialStatus::UnderTesting),
            current_location_id: Set(location_id),
            original_outlet_id: Set(Some(original_outlet_id)),
            testing_request_id: Set(Some(request_id)),
            test_result: Set(None),
            test_remark: Set(None),
            tested_at: Set(None),
            tested_by: Set(None),
            transfer_history: Set(encode_history(&opening)?),
            ..Default::default()
        };
        record.insert(txn).await.map_err(ServiceError::db_error)?;
    }
    Ok(())
}

/// Records a test outcome for one serialized unit at the testing center.
/// The unit moves out of `under_testing` into the outcome counter, and the
/// last transfer-history entry is stamped with the result in place.
#[instrument(skip(txn))]
pub async fn record_test_result(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
    serial_number: &str,
    result: TestOutcome,
    remark: Option<String>,
    tested_by: Uuid,
) -> Result<serial_record::Model, ServiceError> {
    let entry = require_entry(txn, location_id, product_id).await?;
    let serial = require_serial(txn, &entry, serial_number).await?;
    if serial.status != SerialStatus::UnderTesting {
        return Err(ServiceError::AlreadyProcessed(format!(
            "Serial {} is not under testing",
            serial_number
        )));
    }

    let new_status = result.as_serial_status();
    let history = stamped_history(&serial, new_status, Some(result))?;
    let now = Utc::now();
    let res = serial_record::Entity::update_many()
        .col_expr(serial_record::Column::Status, Expr::value(new_status))
        .col_expr(serial_record::Column::TestResult, Expr::value(result))
        .col_expr(
            serial_record::Column::TestRemark,
            Expr::value(remark.clone()),
        )
        .col_expr(serial_record::Column::TestedAt, Expr::value(now))
        .col_expr(serial_record::Column::TestedBy, Expr::value(tested_by))
        .col_expr(serial_record::Column::TransferHistory, Expr::value(history))
        .col_expr(serial_record::Column::UpdatedAt, Expr::value(now))
        .filter(serial_record::Column::Id.eq(serial.id))
        .filter(serial_record::Column::Status.eq(SerialStatus::UnderTesting))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;
    if res.rows_affected == 0 {
        return Err(ServiceError::AlreadyProcessed(format!(
            "Serial {} already has a result",
            serial_number
        )));
    }

    apply_counter_deltas(
        txn,
        entry.id,
        &[
            (stock_entry::Column::UnderTesting, -1),
            (outcome_column(result), 1),
        ],
        "record result",
    )
    .await?;

    require_serial(txn, &entry, serial_number).await
}

/// Non-serialized counterpart of `record_test_result`: moves a quantity out
/// of `under_testing` into the matching outcome counter.
#[instrument(skip(txn))]
pub async fn record_quantity_test_result(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
    qty: i32,
    result: TestOutcome,
) -> Result<(), ServiceError> {
    let entry = require_entry(txn, location_id, product_id).await?;
    if entry.under_testing < qty {
        return Err(ServiceError::InsufficientStock(format!(
            "Product {} at location {} has only {} under testing, cannot record {}",
            product_id, location_id, entry.under_testing, qty
        )));
    }
    apply_counter_deltas(
        txn,
        entry.id,
        &[
            (stock_entry::Column::UnderTesting, -qty),
            (outcome_column(result), qty),
        ],
        "record quantity result",
    )
    .await
}

/// Ships tested serials out of the testing-center ledger back toward their
/// outlet. The serial flips to `returned`, and `total`/`available` plus the
/// outcome counter matching its recorded result all decrease. Returns the
/// affected records so the caller can mirror results at the outlet.
#[instrument(skip(txn, serials), fields(serial_count = serials.len()))]
pub async fn return_serials_to_outlet(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
    serials: &[String],
    destination_id: Uuid,
    return_type: TransferType,
) -> Result<Vec<serial_record::Model>, ServiceError> {
    let entry = require_entry(txn, location_id, product_id).await?;
    let mut returned = Vec::with_capacity(serials.len());

    for serial_number in serials {
        let serial = require_serial(txn, &entry, serial_number).await?;
        let result = serial.test_result.ok_or_else(|| {
            ServiceError::InvalidInput(format!(
                "Serial {} has no recorded test result to return with",
                serial_number
            ))
        })?;
        let expected = serial.status;
        if !matches!(
            expected,
            SerialStatus::Passed | SerialStatus::Failed | SerialStatus::Tested
        ) {
            return Err(ServiceError::InvalidInput(format!(
                "Serial {} is not in a returnable state",
                serial_number
            )));
        }

        let history = appended_history(
            &serial,
            TransferEvent {
                from_location: location_id,
                to_location: destination_id,
                date: Utc::now(),
                transfer_type: return_type,
                status: SerialStatus::Returned,
                test_result: Some(result),
            },
        )?;
        let claimed = update_serial_guarded(
            txn,
            serial.id,
            expected,
            SerialStatus::Returned,
            Some(destination_id),
            history,
        )
        .await?;
        if claimed == 0 {
            return Err(ServiceError::AlreadyProcessed(format!(
                "Serial {} was already returned",
                serial_number
            )));
        }

        apply_counter_deltas(
            txn,
            entry.id,
            &[
                (stock_entry::Column::Total, -1),
                (stock_entry::Column::Available, -1),
                (outcome_column(result), -1),
            ],
            "return serial",
        )
        .await?;

        returned.push(require_serial(txn, &entry, serial_number).await?);
    }
    Ok(returned)
}

/// Non-serialized return: removes a tested quantity from the testing-center
/// ledger, decrementing the outcome counter the quantity was recorded under.
#[instrument(skip(txn))]
pub async fn return_quantity_to_outlet(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
    qty: i32,
    result: TestOutcome,
) -> Result<(), ServiceError> {
    let entry = require_entry(txn, location_id, product_id).await?;
    let recorded = match result {
        TestOutcome::Passed => entry.passed,
        TestOutcome::Failed => entry.failed,
        TestOutcome::Tested => entry.tested,
    };
    if recorded < qty {
        return Err(ServiceError::InsufficientStock(format!(
            "Product {} at location {} has only {} recorded as {:?}, cannot return {}",
            product_id, location_id, recorded, result, qty
        )));
    }
    apply_counter_deltas(
        txn,
        entry.id,
        &[
            (stock_entry::Column::Total, -qty),
            (stock_entry::Column::Available, -qty),
            (outcome_column(result), -qty),
        ],
        "return quantity",
    )
    .await
}

/// The symmetric outlet-side effect of a return: stock becomes available
/// again and the outlet's serial copies pick up the recorded results.
/// Outlet `total` is untouched; it never moved during the testing flow.
#[instrument(skip(txn, returned), fields(serial_count = returned.len()))]
pub async fn restore_at_outlet(
    txn: &DatabaseTransaction,
    outlet_id: Uuid,
    product_id: Uuid,
    qty: i32,
    returned: &[serial_record::Model],
    source_location_id: Uuid,
) -> Result<(), ServiceError> {
    let entry = require_entry(txn, outlet_id, product_id).await?;

    for record in returned {
        let serial = require_serial(txn, &entry, &record.serial_number).await?;
        let history = appended_history(
            &serial,
            TransferEvent {
                from_location: source_location_id,
                to_location: outlet_id,
                date: Utc::now(),
                transfer_type: TransferType::TestingToOutlet,
                status: SerialStatus::Available,
                test_result: record.test_result,
            },
        )?;
        let now = Utc::now();
        serial_record::Entity::update_many()
            .col_expr(
                serial_record::Column::Status,
                Expr::value(SerialStatus::Available),
            )
            .col_expr(
                serial_record::Column::CurrentLocationId,
                Expr::value(outlet_id),
            )
            .col_expr(
                serial_record::Column::TestResult,
                Expr::value(record.test_result),
            )
            .col_expr(
                serial_record::Column::TestRemark,
                Expr::value(record.test_remark.clone()),
            )
            .col_expr(
                serial_record::Column::TestedAt,
                Expr::value(record.tested_at),
            )
            .col_expr(
                serial_record::Column::TestedBy,
                Expr::value(record.tested_by),
            )
            .col_expr(serial_record::Column::TransferHistory, Expr::value(history))
            .col_expr(serial_record::Column::UpdatedAt, Expr::value(now))
            .filter(serial_record::Column::Id.eq(serial.id))
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;
    }

    apply_counter_deltas(
        txn,
        entry.id,
        &[(stock_entry::Column::Available, qty)],
        "restore at outlet",
    )
    .await
}

/// Reverses a reservation when a pending request is cancelled. Serialized
/// units flip back to `available` and the reservation hop in their history
/// is marked rejected; non-serialized stock releases the counter.
#[instrument(skip(txn, serials), fields(serial_count = serials.len()))]
pub async fn release_reservation(
    txn: &DatabaseTransaction,
    location_id: Uuid,
    product_id: Uuid,
    tracks_serial: bool,
    qty: i32,
    serials: &[String],
) -> Result<(), ServiceError> {
    let entry = require_entry(txn, location_id, product_id).await?;

    if tracks_serial {
        for serial_number in serials {
            let serial = require_serial(txn, &entry, serial_number).await?;
            let history = stamped_history(&serial, SerialStatus::Rejected, None)?;
            let released = update_serial_guarded(
                txn,
                serial.id,
                SerialStatus::PendingTesting,
                SerialStatus::Available,
                None,
                history,
            )
            .await?;
            if released == 0 {
                return Err(ServiceError::AlreadyProcessed(format!(
                    "Serial {} is no longer pending testing",
                    serial_number
                )));
            }
        }
    } else {
        apply_counter_deltas(
            txn,
            entry.id,
            &[(stock_entry::Column::PendingTesting, -qty)],
            "release reservation",
        )
        .await?;
    }
    Ok(())
}

/// Read-side service over the stock ledgers.
#[derive(Clone)]
pub struct StockLedgerService {
    db: Arc<DatabaseConnection>,
    permissions: SharedPermissionOracle,
}

impl StockLedgerService {
    pub fn new(db: Arc<DatabaseConnection>, permissions: SharedPermissionOracle) -> Self {
        Self { db, permissions }
    }

    /// Stock entries currently holding units under testing at a location.
    #[instrument(skip(self, actor))]
    pub async fn list_under_testing(
        &self,
        actor: &CallerContext,
        location_id: Uuid,
    ) -> Result<Vec<stock_entry::Model>, ServiceError> {
        self.permissions
            .ensure(actor, Modules::STOCK, Actions::READ)?;
        stock_entry::Entity::find()
            .filter(stock_entry::Column::LocationId.eq(location_id))
            .filter(stock_entry::Column::UnderTesting.gt(0))
            .order_by_asc(stock_entry::Column::ProductId)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Serial records under testing for one product at a location.
    #[instrument(skip(self, actor))]
    pub async fn list_under_testing_serials(
        &self,
        actor: &CallerContext,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Result<Vec<serial_record::Model>, ServiceError> {
        self.permissions
            .ensure(actor, Modules::STOCK, Actions::READ)?;
        let entry = stock_entry::Entity::find()
            .filter(stock_entry::Column::LocationId.eq(location_id))
            .filter(stock_entry::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        let Some(entry) = entry else {
            return Ok(Vec::new());
        };
        serial_record::Entity::find()
            .filter(serial_record::Column::StockEntryId.eq(entry.id))
            .filter(serial_record::Column::Status.eq(SerialStatus::UnderTesting))
            .order_by_asc(serial_record::Column::SerialNumber)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// One ledger row with its serials, for stock views.
    #[instrument(skip(self, actor))]
    pub async fn get_entry(
        &self,
        actor: &CallerContext,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<(stock_entry::Model, Vec<serial_record::Model>)>, ServiceError> {
        self.permissions
            .ensure(actor, Modules::STOCK, Actions::READ)?;
        let entry = stock_entry::Entity::find()
            .filter(stock_entry::Column::LocationId.eq(location_id))
            .filter(stock_entry::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        let Some(entry) = entry else {
            return Ok(None);
        };
        let serials = serial_record::Entity::find()
            .filter(serial_record::Column::StockEntryId.eq(entry.id))
            .order_by_asc(serial_record::Column::SerialNumber)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(Some((entry, serials)))
    }
}
