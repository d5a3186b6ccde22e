use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::serial_record::{SerialStatus, TestOutcome};

/// The request's own copy of one serial's state, mirrored from the ledger on
/// every transition. Kept alongside the ledger record so the request document
/// is self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSerialState {
    pub serial_number: String,
    pub status: SerialStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_result: Option<TestOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_remark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tested_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tested_by: Option<Uuid>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "testing_request_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub request_id: Uuid,
    pub line_no: i32,
    pub product_id: Uuid,
    pub quantity: i32,
    /// Requested serial numbers; empty for non-serialized products.
    #[sea_orm(column_type = "Json")]
    pub serial_numbers: Json,
    /// Mirrored `LineSerialState` list; empty until accept.
    #[sea_orm(column_type = "Json")]
    pub serial_states: Json,
    /// Outcome tallies for non-serialized lines.
    pub passed_qty: i32,
    pub failed_qty: i32,
    pub tested_qty: i32,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::testing_request::Entity",
        from = "Column::RequestId",
        to = "super::testing_request::Column::Id"
    )]
    Request,
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::testing_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Request.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        if insert {
            if let ActiveValue::NotSet = self.id {
                self.id = ActiveValue::Set(Uuid::new_v4());
            }
            if let ActiveValue::NotSet = self.created_at {
                self.created_at = ActiveValue::Set(now);
            }
            if let ActiveValue::NotSet = self.serial_numbers {
                self.serial_numbers = ActiveValue::Set(serde_json::json!([]));
            }
            if let ActiveValue::NotSet = self.serial_states {
                self.serial_states = ActiveValue::Set(serde_json::json!([]));
            }
        }
        self.updated_at = ActiveValue::Set(now);
        Ok(self)
    }
}

impl Model {
    pub fn serials(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_value(self.serial_numbers.clone())
    }

    pub fn states(&self) -> Result<Vec<LineSerialState>, serde_json::Error> {
        serde_json::from_value(self.serial_states.clone())
    }

    /// A line is resolved when every serial has an outcome (serialized) or
    /// the outcome tallies cover the full quantity (non-serialized).
    pub fn is_resolved(&self) -> bool {
        match self.states() {
            Ok(states) if !states.is_empty() => states.iter().all(|s| {
                matches!(
                    s.status,
                    SerialStatus::Tested
                        | SerialStatus::Passed
                        | SerialStatus::Failed
                        | SerialStatus::Returned
                )
            }),
            _ => self.passed_qty + self.failed_qty + self.tested_qty >= self.quantity,
        }
    }
}

pub fn encode_states(states: &[LineSerialState]) -> Result<Json, serde_json::Error> {
    serde_json::to_value(states)
}

pub fn encode_serials(serials: &[String]) -> Result<Json, serde_json::Error> {
    serde_json::to_value(serials)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_with(states: Vec<LineSerialState>, quantity: i32) -> Model {
        Model {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            line_no: 1,
            product_id: Uuid::new_v4(),
            quantity,
            serial_numbers: serde_json::json!([]),
            serial_states: encode_states(&states).unwrap(),
            passed_qty: 0,
            failed_qty: 0,
            tested_qty: 0,
            remark: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn state(serial: &str, status: SerialStatus) -> LineSerialState {
        LineSerialState {
            serial_number: serial.to_string(),
            status,
            test_result: None,
            test_remark: None,
            tested_at: None,
            tested_by: None,
        }
    }

    #[test]
    fn serialized_line_resolves_when_all_serials_have_outcomes() {
        let unresolved = line_with(
            vec![
                state("SN-1", SerialStatus::Passed),
                state("SN-2", SerialStatus::UnderTesting),
            ],
            2,
        );
        assert!(!unresolved.is_resolved());

        let resolved = line_with(
            vec![
                state("SN-1", SerialStatus::Passed),
                state("SN-2", SerialStatus::Failed),
            ],
            2,
        );
        assert!(resolved.is_resolved());
    }

    #[test]
    fn quantity_line_resolves_when_tallies_cover_quantity() {
        let mut line = line_with(vec![], 4);
        assert!(!line.is_resolved());
        line.passed_qty = 3;
        line.failed_qty = 1;
        assert!(line.is_resolved());
    }
}
