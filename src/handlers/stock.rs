use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::CallerContext;
use crate::entities::{serial_record, stock_entry};
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState};

/// A ledger row with its serial records, for stock views.
#[derive(Debug, Serialize)]
pub struct StockEntryView {
    #[serde(flatten)]
    pub entry: stock_entry::Model,
    pub serials: Vec<serial_record::Model>,
}

/// Create the stock ledger router
pub fn stock_router() -> Router<AppState> {
    Router::new()
        .route("/under-testing/:location_id", get(list_under_testing))
        .route(
            "/under-testing/:location_id/:product_id/serials",
            get(list_under_testing_serials),
        )
        .route("/:location_id/:product_id", get(get_entry))
}

async fn list_under_testing(
    State(state): State<AppState>,
    actor: CallerContext,
    Path(location_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let entries = state
        .services
        .stock
        .list_under_testing(&actor, location_id)
        .await?;
    Ok(Json(ApiResponse::success(entries)))
}

async fn list_under_testing_serials(
    State(state): State<AppState>,
    actor: CallerContext,
    Path((location_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    let serials = state
        .services
        .stock
        .list_under_testing_serials(&actor, location_id, product_id)
        .await?;
    Ok(Json(ApiResponse::success(serials)))
}

async fn get_entry(
    State(state): State<AppState>,
    actor: CallerContext,
    Path((location_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    let found = state
        .services
        .stock
        .get_entry(&actor, location_id, product_id)
        .await?;
    let (entry, serials) = found.ok_or_else(|| {
        ServiceError::NotFound(format!(
            "No stock entry for product {} at location {}",
            product_id, location_id
        ))
    })?;
    Ok(Json(ApiResponse::success(StockEntryView { entry, serials })))
}
