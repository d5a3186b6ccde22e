use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::CallerContext;
use crate::entities::RequestStatus;
use crate::errors::ServiceError;
use crate::services::testing_requests::{
    CreateRequestInput, RecordResultsInput, RequestFilter, ReturnInput,
};
use crate::{ApiResponse, AppState, PagedResponse};

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub status: Option<RequestStatus>,
    pub from_location_id: Option<Uuid>,
    pub to_location_id: Option<Uuid>,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    20
}

/// Create the testing requests router
pub fn testing_requests_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_request).get(list_requests))
        .route("/:id", get(get_request))
        .route("/:id/accept", post(accept_request))
        .route("/:id/results", post(record_results))
        .route("/:id/return", post(return_to_outlet))
        .route("/:id/cancel", post(cancel_request))
}

async fn create_request(
    State(state): State<AppState>,
    actor: CallerContext,
    Json(input): Json<CreateRequestInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state
        .services
        .testing_requests
        .create_request(&actor, input)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(detail))))
}

async fn list_requests(
    State(state): State<AppState>,
    actor: CallerContext,
    Query(query): Query<ListRequestsQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let filter = RequestFilter {
        status: query.status,
        from_location_id: query.from_location_id,
        to_location_id: query.to_location_id,
    };
    let (items, total) = state
        .services
        .testing_requests
        .list_requests(&actor, filter, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(PagedResponse {
        items,
        total,
        page: query.page,
        limit: query.limit,
    })))
}

async fn get_request(
    State(state): State<AppState>,
    actor: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state
        .services
        .testing_requests
        .get_request(&actor, id)
        .await?;
    Ok(Json(ApiResponse::success(detail)))
}

async fn accept_request(
    State(state): State<AppState>,
    actor: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state
        .services
        .testing_requests
        .accept_request(&actor, id)
        .await?;
    Ok(Json(ApiResponse::success(detail)))
}

async fn record_results(
    State(state): State<AppState>,
    actor: CallerContext,
    Path(id): Path<Uuid>,
    Json(input): Json<RecordResultsInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state
        .services
        .testing_requests
        .record_results(&actor, id, input)
        .await?;
    Ok(Json(ApiResponse::success(detail)))
}

async fn return_to_outlet(
    State(state): State<AppState>,
    actor: CallerContext,
    Path(id): Path<Uuid>,
    Json(input): Json<ReturnInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state
        .services
        .testing_requests
        .return_to_outlet(&actor, id, input)
        .await?;
    Ok(Json(ApiResponse::success(detail)))
}

async fn cancel_request(
    State(state): State<AppState>,
    actor: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state
        .services
        .testing_requests
        .cancel_request(&actor, id)
        .await?;
    Ok(Json(ApiResponse::success(detail)))
}
