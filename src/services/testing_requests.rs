//! The testing-request workflow engine.
//!
//! Coordinates the request aggregate and both stock ledgers on every
//! lifecycle event. Each operation validates every line before mutating any
//! of them, runs inside a single transaction, and flips request status with
//! a conditional update so concurrent callers lose cleanly with
//! `AlreadyProcessed` instead of double-applying ledger effects.

use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::permissions::{Actions, Modules};
use crate::auth::{CallerContext, SharedPermissionOracle};
use crate::entities::testing_request_line::{encode_serials, encode_states, LineSerialState};
use crate::entities::{
    serial_record, testing_request, testing_request_line, RequestStatus, SerialStatus,
    TestOutcome, TransferType,
};
use crate::errors::{is_unique_violation, ServiceError};
use crate::events::{Event, EventSender};
use crate::services::{catalog, stock_ledger};

/// Bounded retries for request-number collisions before surfacing `Conflict`.
const REQUEST_NUMBER_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateRequestLineInput {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Required (and length must equal `quantity`) iff the product tracks
    /// serials; must be empty otherwise.
    #[serde(default)]
    pub serial_numbers: Vec<String>,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateRequestInput {
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    pub lines: Vec<CreateRequestLineInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SerialResultInput {
    pub serial_number: String,
    pub result: TestOutcome,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuantityResultInput {
    pub product_id: Uuid,
    pub quantity: i32,
    pub result: TestOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecordResultsInput {
    #[serde(default)]
    pub serial_results: Vec<SerialResultInput>,
    #[serde(default)]
    pub quantity_results: Vec<QuantityResultInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReturnInput {
    #[serde(default)]
    pub serial_numbers: Vec<String>,
    #[serde(default)]
    pub quantity_returns: Vec<QuantityResultInput>,
}

/// A request with its lines, as exposed to the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct TestingRequestDetail {
    #[serde(flatten)]
    pub request: testing_request::Model,
    pub lines: Vec<testing_request_line::Model>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub from_location_id: Option<Uuid>,
    pub to_location_id: Option<Uuid>,
}

/// Builds the human-readable request number: `TM` + yymmdd + 4-digit
/// sequence. A best-effort label; true uniqueness comes from the DB
/// constraint with bounded retry.
fn format_request_number(date: chrono::DateTime<Utc>, seq: u64) -> String {
    format!("TM{}{:04}", date.format("%y%m%d"), seq)
}

async fn generate_request_number(txn: &DatabaseTransaction) -> Result<String, ServiceError> {
    let existing = testing_request::Entity::find()
        .count(txn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(format_request_number(Utc::now(), existing + 1))
}

#[derive(Clone)]
pub struct TestingRequestService {
    db: Arc<DatabaseConnection>,
    permissions: SharedPermissionOracle,
    event_sender: Option<EventSender>,
}

impl TestingRequestService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        permissions: SharedPermissionOracle,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            permissions,
            event_sender,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    async fn load_detail(&self, request_id: Uuid) -> Result<TestingRequestDetail, ServiceError> {
        let request = testing_request::Entity::find_by_id(request_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Testing request {} not found", request_id))
            })?;
        let lines = testing_request_line::Entity::find()
            .filter(testing_request_line::Column::RequestId.eq(request_id))
            .order_by_asc(testing_request_line::Column::LineNo)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(TestingRequestDetail { request, lines })
    }

    /// Creates a testing request in `pending_testing`, reserving outlet stock
    /// for every line. Either all lines reserve or none do.
    #[instrument(skip(self, actor, input), fields(from = %input.from_location_id, to = %input.to_location_id))]
    pub async fn create_request(
        &self,
        actor: &CallerContext,
        input: CreateRequestInput,
    ) -> Result<TestingRequestDetail, ServiceError> {
        self.permissions
            .ensure(actor, Modules::TESTING, Actions::CREATE)?;
        validate_create_shape(&input)?;

        let mut attempt = 0;
        let detail = loop {
            attempt += 1;
            match self.try_create(actor, &input).await {
                Ok(detail) => break detail,
                Err(ServiceError::DatabaseError(err)) if is_unique_violation(&err) => {
                    if attempt >= REQUEST_NUMBER_ATTEMPTS {
                        return Err(ServiceError::Conflict(format!(
                            "Request number collision persisted after {} attempts",
                            attempt
                        )));
                    }
                    warn!(attempt, "Request number collision, regenerating");
                    continue;
                }
                Err(e) => return Err(e),
            }
        };

        counter!("testing.requests.created", 1);
        histogram!("testing.requests.line_count", detail.lines.len() as f64);
        self.emit(Event::TestingRequestCreated {
            request_id: detail.request.id,
            request_number: detail.request.request_number.clone(),
            from_location_id: detail.request.from_location_id,
            to_location_id: detail.request.to_location_id,
            line_count: detail.lines.len(),
        })
        .await;
        info!(
            request_number = %detail.request.request_number,
            lines = detail.lines.len(),
            "Testing request created"
        );
        Ok(detail)
    }

    async fn try_create(
        &self,
        actor: &CallerContext,
        input: &CreateRequestInput,
    ) -> Result<TestingRequestDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let from = catalog::get_location(&txn, input.from_location_id).await?;
        if !from.is_outlet() {
            return Err(ServiceError::InvalidInput(format!(
                "Location {} is not an outlet and cannot request testing",
                from.id
            )));
        }
        let to = catalog::get_location(&txn, input.to_location_id).await?;
        if !to.can_test() {
            return Err(ServiceError::InvalidInput(format!(
                "Location {} is not capable of testing",
                to.id
            )));
        }

        // Validate every line before reserving anything.
        let mut prepared = Vec::with_capacity(input.lines.len());
        for (idx, line) in input.lines.iter().enumerate() {
            let product = catalog::get_product(&txn, line.product_id).await?;
            if product.tracks_serial {
                if line.serial_numbers.len() != line.quantity as usize {
                    return Err(ServiceError::InvalidInput(format!(
                        "Line {}: product {} tracks serials, expected {} serial numbers, got {}",
                        idx + 1,
                        product.sku,
                        line.quantity,
                        line.serial_numbers.len()
                    )));
                }
            } else if !line.serial_numbers.is_empty() {
                return Err(ServiceError::InvalidInput(format!(
                    "Line {}: product {} does not track serials",
                    idx + 1,
                    product.sku
                )));
            }
            stock_ledger::ensure_reserve_preconditions(
                &txn,
                from.id,
                product.id,
                product.tracks_serial,
                line.quantity,
                &line.serial_numbers,
            )
            .await?;
            prepared.push((line, product));
        }

        let request_number = generate_request_number(&txn).await?;
        let now = Utc::now();
        let request = testing_request::ActiveModel {
            request_number: Set(request_number),
            from_location_id: Set(from.id),
            to_location_id: Set(to.id),
            status: Set(RequestStatus::PendingTesting),
            requested_by: Set(actor.user_id),
            requested_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::DatabaseError)?;

        let mut lines = Vec::with_capacity(prepared.len());
        for (idx, (line, product)) in prepared.iter().enumerate() {
            let model = testing_request_line::ActiveModel {
                request_id: Set(request.id),
                line_no: Set(idx as i32 + 1),
                product_id: Set(product.id),
                quantity: Set(line.quantity),
                serial_numbers: Set(encode_serials(&line.serial_numbers)?),
                remark: Set(line.remark.clone()),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;

            stock_ledger::reserve_for_testing(
                &txn,
                from.id,
                product.id,
                product.tracks_serial,
                line.quantity,
                &line.serial_numbers,
                to.id,
            )
            .await?;
            lines.push(model);
        }

        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(TestingRequestDetail { request, lines })
    }

    /// Accepts a pending request at its testing center: commits the outlet
    /// draw-down and receives the stock into the center ledger for every
    /// line, atomically. Only an actor belonging to the destination center
    /// may accept; a losing concurrent accept gets `AlreadyProcessed`.
    #[instrument(skip(self, actor))]
    pub async fn accept_request(
        &self,
        actor: &CallerContext,
        request_id: Uuid,
    ) -> Result<TestingRequestDetail, ServiceError> {
        self.permissions
            .ensure(actor, Modules::TESTING, Actions::ACCEPT)?;

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let request = require_request(&txn, request_id).await?;
        if actor.home_location_id != Some(request.to_location_id) {
            return Err(ServiceError::Forbidden(format!(
                "Only members of testing center {} may accept request {}",
                request.to_location_id, request.request_number
            )));
        }

        // Claim the request: pending_testing -> under_testing, first caller wins.
        let now = Utc::now();
        let claimed = testing_request::Entity::update_many()
            .col_expr(
                testing_request::Column::Status,
                Expr::value(RequestStatus::UnderTesting),
            )
            .col_expr(
                testing_request::Column::AcceptedBy,
                Expr::value(actor.user_id),
            )
            .col_expr(testing_request::Column::AcceptedAt, Expr::value(now))
            .col_expr(testing_request::Column::UpdatedAt, Expr::value(now))
            .filter(testing_request::Column::Id.eq(request_id))
            .filter(testing_request::Column::Status.eq(RequestStatus::PendingTesting))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if claimed.rows_affected == 0 {
            return Err(ServiceError::AlreadyProcessed(format!(
                "Request {} is not pending testing",
                request.request_number
            )));
        }

        let lines = load_lines(&txn, request_id).await?;

        // Two-phase: validate commit and receive for every line, then apply.
        let mut prepared = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = catalog::get_product(&txn, line.product_id).await?;
            let serials = line.serials()?;
            stock_ledger::ensure_commit_preconditions(
                &txn,
                request.from_location_id,
                product.id,
                product.tracks_serial,
                line.quantity,
                &serials,
            )
            .await?;
            stock_ledger::ensure_receive_preconditions(
                &txn,
                request.to_location_id,
                product.id,
                &serials,
            )
            .await?;
            prepared.push((line, product, serials));
        }

        for (line, product, serials) in &prepared {
            stock_ledger::commit_to_testing(
                &txn,
                request.from_location_id,
                product.id,
                product.tracks_serial,
                line.quantity,
                serials,
                request.to_location_id,
            )
            .await?;
            stock_ledger::receive_for_testing(
                &txn,
                request.to_location_id,
                product.id,
                line.quantity,
                serials,
                request.from_location_id,
                request.id,
            )
            .await?;

            if product.tracks_serial {
                let states: Vec<LineSerialState> = serials
                    .iter()
                    .map(|serial_number| LineSerialState {
                        serial_number: serial_number.clone(),
                        status: SerialStatus::UnderTesting,
                        test_result: None,
                        test_remark: None,
                        tested_at: None,
                        tested_by: None,
                    })
                    .collect();
                set_line_states(&txn, line.id, &states).await?;
            }
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("testing.requests.accepted", 1);
        self.emit(Event::TestingRequestAccepted {
            request_id,
            accepted_by: actor.user_id,
        })
        .await;
        info!(request_number = %request.request_number, "Testing request accepted");
        self.load_detail(request_id).await
    }

    /// Records test outcomes for serials and/or quantities on an accepted
    /// request, mirroring each result into the request's own serial copy.
    /// Once every line is resolved the request transitions to `completed`.
    #[instrument(skip(self, actor, input))]
    pub async fn record_results(
        &self,
        actor: &CallerContext,
        request_id: Uuid,
        input: RecordResultsInput,
    ) -> Result<TestingRequestDetail, ServiceError> {
        self.permissions
            .ensure(actor, Modules::TESTING, Actions::RECORD)?;
        if input.serial_results.is_empty() && input.quantity_results.is_empty() {
            return Err(ServiceError::InvalidInput(
                "No test results supplied".to_string(),
            ));
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let request = require_request(&txn, request_id).await?;
        if request.status != RequestStatus::UnderTesting {
            return Err(ServiceError::AlreadyProcessed(format!(
                "Request {} is not under testing",
                request.request_number
            )));
        }

        let lines = load_lines(&txn, request_id).await?;

        for serial_result in &input.serial_results {
            let line = find_serial_line(&lines, &serial_result.serial_number)?;
            let record = stock_ledger::record_test_result(
                &txn,
                request.to_location_id,
                line.product_id,
                &serial_result.serial_number,
                serial_result.result,
                serial_result.remark.clone(),
                actor.user_id,
            )
            .await?;
            mirror_serial_state(&txn, line.id, &record).await?;
        }

        for quantity_result in &input.quantity_results {
            if quantity_result.quantity <= 0 {
                return Err(ServiceError::InvalidInput(format!(
                    "Result quantity must be positive, got {}",
                    quantity_result.quantity
                )));
            }
            let line = find_quantity_line(&lines, quantity_result.product_id)?;
            let fresh = require_line(&txn, line.id).await?;
            let recorded = fresh.passed_qty + fresh.failed_qty + fresh.tested_qty;
            if recorded + quantity_result.quantity > fresh.quantity {
                return Err(ServiceError::InvalidInput(format!(
                    "Result quantity {} exceeds the {} still unresolved on line {}",
                    quantity_result.quantity,
                    fresh.quantity - recorded,
                    fresh.line_no
                )));
            }
            stock_ledger::record_quantity_test_result(
                &txn,
                request.to_location_id,
                quantity_result.product_id,
                quantity_result.quantity,
                quantity_result.result,
            )
            .await?;
            add_line_tally(&txn, fresh.id, quantity_result.result, quantity_result.quantity)
                .await?;
        }

        // Completion check: all serials and quantities resolved.
        let lines = load_lines(&txn, request_id).await?;
        let completed = lines.iter().all(|line| line.is_resolved());
        let now = Utc::now();
        if completed {
            testing_request::Entity::update_many()
                .col_expr(
                    testing_request::Column::Status,
                    Expr::value(RequestStatus::Completed),
                )
                .col_expr(
                    testing_request::Column::CompletedBy,
                    Expr::value(actor.user_id),
                )
                .col_expr(testing_request::Column::CompletedAt, Expr::value(now))
                .col_expr(testing_request::Column::UpdatedAt, Expr::value(now))
                .filter(testing_request::Column::Id.eq(request_id))
                .filter(testing_request::Column::Status.eq(RequestStatus::UnderTesting))
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!(
            "testing.results.recorded",
            (input.serial_results.len() + input.quantity_results.len()) as u64
        );
        for serial_result in &input.serial_results {
            let line = find_serial_line(&lines, &serial_result.serial_number)?;
            self.emit(Event::TestResultRecorded {
                request_id,
                product_id: line.product_id,
                serial_number: Some(serial_result.serial_number.clone()),
                result: serial_result.result,
            })
            .await;
        }
        for quantity_result in &input.quantity_results {
            self.emit(Event::TestResultRecorded {
                request_id,
                product_id: quantity_result.product_id,
                serial_number: None,
                result: quantity_result.result,
            })
            .await;
        }
        if completed {
            counter!("testing.requests.completed", 1);
            self.emit(Event::TestingRequestCompleted {
                request_id,
                completed_at: now,
            })
            .await;
            info!(request_number = %request.request_number, "Testing request completed");
        }
        self.load_detail(request_id).await
    }

    /// Returns tested stock from the testing center back to the outlet:
    /// the center ledger sheds the units and the outlet regains `available`.
    #[instrument(skip(self, actor, input))]
    pub async fn return_to_outlet(
        &self,
        actor: &CallerContext,
        request_id: Uuid,
        input: ReturnInput,
    ) -> Result<TestingRequestDetail, ServiceError> {
        self.permissions
            .ensure(actor, Modules::TESTING, Actions::RETURN)?;
        if input.serial_numbers.is_empty() && input.quantity_returns.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Nothing to return".to_string(),
            ));
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let request = require_request(&txn, request_id).await?;
        if !matches!(
            request.status,
            RequestStatus::UnderTesting | RequestStatus::Completed
        ) {
            return Err(ServiceError::AlreadyProcessed(format!(
                "Request {} has no stock at the testing center",
                request.request_number
            )));
        }

        let lines = load_lines(&txn, request_id).await?;
        let mut returned_by_product: HashMap<Uuid, i32> = HashMap::new();

        for serial_number in &input.serial_numbers {
            let line = find_serial_line(&lines, serial_number)?;
            let returned = stock_ledger::return_serials_to_outlet(
                &txn,
                request.to_location_id,
                line.product_id,
                std::slice::from_ref(serial_number),
                request.from_location_id,
                TransferType::TestingToOutlet,
            )
            .await?;
            stock_ledger::restore_at_outlet(
                &txn,
                request.from_location_id,
                line.product_id,
                1,
                &returned,
                request.to_location_id,
            )
            .await?;
            for record in &returned {
                mirror_serial_state(&txn, line.id, record).await?;
            }
            *returned_by_product.entry(line.product_id).or_insert(0) += 1;
        }

        for quantity_return in &input.quantity_returns {
            if quantity_return.quantity <= 0 {
                return Err(ServiceError::InvalidInput(format!(
                    "Return quantity must be positive, got {}",
                    quantity_return.quantity
                )));
            }
            find_quantity_line(&lines, quantity_return.product_id)?;
            stock_ledger::return_quantity_to_outlet(
                &txn,
                request.to_location_id,
                quantity_return.product_id,
                quantity_return.quantity,
                quantity_return.result,
            )
            .await?;
            stock_ledger::restore_at_outlet(
                &txn,
                request.from_location_id,
                quantity_return.product_id,
                quantity_return.quantity,
                &[],
                request.to_location_id,
            )
            .await?;
            *returned_by_product
                .entry(quantity_return.product_id)
                .or_insert(0) += quantity_return.quantity;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("testing.stock.returned", 1);
        for (product_id, quantity) in returned_by_product {
            self.emit(Event::TestingStockReturned {
                request_id,
                product_id,
                quantity,
            })
            .await;
        }
        info!(request_number = %request.request_number, "Tested stock returned to outlet");
        self.load_detail(request_id).await
    }

    /// Cancels a request that has not been accepted yet, releasing every
    /// line's reservation on the outlet ledger.
    #[instrument(skip(self, actor))]
    pub async fn cancel_request(
        &self,
        actor: &CallerContext,
        request_id: Uuid,
    ) -> Result<TestingRequestDetail, ServiceError> {
        self.permissions
            .ensure(actor, Modules::TESTING, Actions::CANCEL)?;

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let request = require_request(&txn, request_id).await?;

        let now = Utc::now();
        let claimed = testing_request::Entity::update_many()
            .col_expr(
                testing_request::Column::Status,
                Expr::value(RequestStatus::Cancelled),
            )
            .col_expr(
                testing_request::Column::CancelledBy,
                Expr::value(actor.user_id),
            )
            .col_expr(testing_request::Column::CancelledAt, Expr::value(now))
            .col_expr(testing_request::Column::UpdatedAt, Expr::value(now))
            .filter(testing_request::Column::Id.eq(request_id))
            .filter(testing_request::Column::Status.eq(RequestStatus::PendingTesting))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if claimed.rows_affected == 0 {
            return Err(ServiceError::AlreadyProcessed(format!(
                "Request {} can no longer be cancelled",
                request.request_number
            )));
        }

        let lines = load_lines(&txn, request_id).await?;
        for line in &lines {
            let product = catalog::get_product(&txn, line.product_id).await?;
            let serials = line.serials()?;
            stock_ledger::release_reservation(
                &txn,
                request.from_location_id,
                product.id,
                product.tracks_serial,
                line.quantity,
                &serials,
            )
            .await?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("testing.requests.cancelled", 1);
        self.emit(Event::TestingRequestCancelled {
            request_id,
            cancelled_by: actor.user_id,
        })
        .await;
        info!(request_number = %request.request_number, "Testing request cancelled");
        self.load_detail(request_id).await
    }

    /// Fetches one request with its lines.
    #[instrument(skip(self, actor))]
    pub async fn get_request(
        &self,
        actor: &CallerContext,
        request_id: Uuid,
    ) -> Result<TestingRequestDetail, ServiceError> {
        self.permissions
            .ensure(actor, Modules::TESTING, Actions::READ)?;
        self.load_detail(request_id).await
    }

    /// Lists requests with optional status/location filters and pagination.
    #[instrument(skip(self, actor))]
    pub async fn list_requests(
        &self,
        actor: &CallerContext,
        filter: RequestFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<testing_request::Model>, u64), ServiceError> {
        self.permissions
            .ensure(actor, Modules::TESTING, Actions::READ)?;
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "Page number must be greater than 0".to_string(),
            ));
        }
        if limit == 0 || limit > 1000 {
            return Err(ServiceError::ValidationError(
                "Limit must be between 1 and 1000".to_string(),
            ));
        }

        let mut query = testing_request::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(testing_request::Column::Status.eq(status));
        }
        if let Some(from) = filter.from_location_id {
            query = query.filter(testing_request::Column::FromLocationId.eq(from));
        }
        if let Some(to) = filter.to_location_id {
            query = query.filter(testing_request::Column::ToLocationId.eq(to));
        }
        query = query.order_by_desc(testing_request::Column::CreatedAt);

        let paginator = query.paginate(&*self.db, limit);
        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::db_error)?;
        let requests = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;
        Ok((requests, total))
    }
}

async fn require_request(
    txn: &DatabaseTransaction,
    request_id: Uuid,
) -> Result<testing_request::Model, ServiceError> {
    testing_request::Entity::find_by_id(request_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Testing request {} not found", request_id)))
}

async fn load_lines(
    txn: &DatabaseTransaction,
    request_id: Uuid,
) -> Result<Vec<testing_request_line::Model>, ServiceError> {
    testing_request_line::Entity::find()
        .filter(testing_request_line::Column::RequestId.eq(request_id))
        .order_by_asc(testing_request_line::Column::LineNo)
        .all(txn)
        .await
        .map_err(ServiceError::db_error)
}

async fn require_line(
    txn: &DatabaseTransaction,
    line_id: Uuid,
) -> Result<testing_request_line::Model, ServiceError> {
    testing_request_line::Entity::find_by_id(line_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Request line {} not found", line_id)))
}

/// The line whose serial list contains the given serial number.
fn find_serial_line<'a>(
    lines: &'a [testing_request_line::Model],
    serial_number: &str,
) -> Result<&'a testing_request_line::Model, ServiceError> {
    for line in lines {
        if line.serials()?.iter().any(|s| s == serial_number) {
            return Ok(line);
        }
    }
    Err(ServiceError::InvalidInput(format!(
        "Serial {} is not part of this request",
        serial_number
    )))
}

/// The non-serialized line for the given product.
fn find_quantity_line(
    lines: &[testing_request_line::Model],
    product_id: Uuid,
) -> Result<&testing_request_line::Model, ServiceError> {
    for line in lines {
        if line.product_id == product_id && line.serials()?.is_empty() {
            return Ok(line);
        }
    }
    Err(ServiceError::InvalidInput(format!(
        "Request has no non-serialized line for product {}",
        product_id
    )))
}

async fn set_line_states(
    txn: &DatabaseTransaction,
    line_id: Uuid,
    states: &[LineSerialState],
) -> Result<(), ServiceError> {
    testing_request_line::Entity::update_many()
        .col_expr(
            testing_request_line::Column::SerialStates,
            Expr::value(encode_states(states)?),
        )
        .col_expr(
            testing_request_line::Column::UpdatedAt,
            Expr::value(Utc::now()),
        )
        .filter(testing_request_line::Column::Id.eq(line_id))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(())
}

/// Mirrors one ledger serial record into the owning line's serial states.
async fn mirror_serial_state(
    txn: &DatabaseTransaction,
    line_id: Uuid,
    record: &serial_record::Model,
) -> Result<(), ServiceError> {
    let line = require_line(txn, line_id).await?;
    let mut states = line.states()?;
    match states
        .iter_mut()
        .find(|s| s.serial_number == record.serial_number)
    {
        Some(state) => {
            state.status = record.status;
            state.test_result = record.test_result;
            state.test_remark = record.test_remark.clone();
            state.tested_at = record.tested_at;
            state.tested_by = record.tested_by;
        }
        None => states.push(LineSerialState {
            serial_number: record.serial_number.clone(),
            status: record.status,
            test_result: record.test_result,
            test_remark: record.test_remark.clone(),
            tested_at: record.tested_at,
            tested_by: record.tested_by,
        }),
    }
    set_line_states(txn, line.id, &states).await
}

async fn add_line_tally(
    txn: &DatabaseTransaction,
    line_id: Uuid,
    result: TestOutcome,
    qty: i32,
) -> Result<(), ServiceError> {
    let column = match result {
        TestOutcome::Passed => testing_request_line::Column::PassedQty,
        TestOutcome::Failed => testing_request_line::Column::FailedQty,
        TestOutcome::Tested => testing_request_line::Column::TestedQty,
    };
    testing_request_line::Entity::update_many()
        .col_expr(column, Expr::col(column).add(qty))
        .col_expr(
            testing_request_line::Column::UpdatedAt,
            Expr::value(Utc::now()),
        )
        .filter(testing_request_line::Column::Id.eq(line_id))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(())
}

/// Shape validation that needs no database: at least one line, positive
/// quantities, and no duplicate serials within a line.
fn validate_create_shape(input: &CreateRequestInput) -> Result<(), ServiceError> {
    if input.lines.is_empty() {
        return Err(ServiceError::InvalidInput(
            "A testing request needs at least one line".to_string(),
        ));
    }
    if input.from_location_id == input.to_location_id {
        return Err(ServiceError::InvalidInput(
            "Source and destination locations must differ".to_string(),
        ));
    }
    for (idx, line) in input.lines.iter().enumerate() {
        if line.quantity <= 0 {
            return Err(ServiceError::InvalidInput(format!(
                "Line {}: quantity must be positive, got {}",
                idx + 1,
                line.quantity
            )));
        }
        let mut seen = HashSet::new();
        for serial_number in &line.serial_numbers {
            if serial_number.trim().is_empty() {
                return Err(ServiceError::InvalidInput(format!(
                    "Line {}: serial numbers cannot be blank",
                    idx + 1
                )));
            }
            if !seen.insert(serial_number.as_str()) {
                return Err(ServiceError::InvalidInput(format!(
                    "Line {}: duplicate serial number {}",
                    idx + 1,
                    serial_number
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn request_number_format() {
        let date = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(format_request_number(date, 1), "TM2403070001");
        assert_eq!(format_request_number(date, 42), "TM2403070042");
        assert_eq!(format_request_number(date, 12345), "TM24030712345");
    }

    fn line(quantity: i32, serials: &[&str]) -> CreateRequestLineInput {
        CreateRequestLineInput {
            product_id: Uuid::new_v4(),
            quantity,
            serial_numbers: serials.iter().map(|s| s.to_string()).collect(),
            remark: None,
        }
    }

    fn input_with(lines: Vec<CreateRequestLineInput>) -> CreateRequestInput {
        CreateRequestInput {
            from_location_id: Uuid::new_v4(),
            to_location_id: Uuid::new_v4(),
            lines,
        }
    }

    #[test]
    fn create_shape_rejects_empty_request() {
        let err = validate_create_shape(&input_with(vec![])).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn create_shape_rejects_non_positive_quantity() {
        let err = validate_create_shape(&input_with(vec![line(0, &[])])).unwrap_err();
        assert!(err.to_string().contains("quantity must be positive"));
    }

    #[test]
    fn create_shape_rejects_duplicate_serials_in_line() {
        let err =
            validate_create_shape(&input_with(vec![line(2, &["SN-1", "SN-1"])])).unwrap_err();
        assert!(err.to_string().contains("duplicate serial number"));
    }

    #[test]
    fn create_shape_rejects_same_source_and_destination() {
        let mut input = input_with(vec![line(1, &[])]);
        input.to_location_id = input.from_location_id;
        assert!(validate_create_shape(&input).is_err());
    }
}
