//! Product catalog and location lookups.
//!
//! The workflow engine treats these as collaborators: it only needs
//! `tracks_serial` from the catalog and the location type for routing
//! validation. Lookups run on whatever connection the caller holds so they
//! can participate in an open transaction.

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entities::{location, product};
use crate::errors::ServiceError;

/// Fetch a product by id, failing with `NotFound` when absent or inactive.
pub async fn get_product<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<product::Model, ServiceError> {
    let found = product::Entity::find_by_id(product_id)
        .filter(product::Column::IsActive.eq(true))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;
    found.ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
}

/// Fetch a location by id, failing with `NotFound` when absent.
pub async fn get_location<C: ConnectionTrait>(
    conn: &C,
    location_id: Uuid,
) -> Result<location::Model, ServiceError> {
    let found = location::Entity::find_by_id(location_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;
    found.ok_or_else(|| ServiceError::NotFound(format!("Location {} not found", location_id)))
}
