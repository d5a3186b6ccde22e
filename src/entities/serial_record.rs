use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of an individually tracked unit within one ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum SerialStatus {
    #[sea_orm(string_value = "available")]
    Available,
    #[sea_orm(string_value = "pending_testing")]
    PendingTesting,
    #[sea_orm(string_value = "under_testing")]
    UnderTesting,
    #[sea_orm(string_value = "tested")]
    Tested,
    #[sea_orm(string_value = "passed")]
    Passed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "returned")]
    Returned,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

/// Outcome recorded for a tested unit or quantity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    #[sea_orm(string_value = "passed")]
    Passed,
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Tested without a pass/fail verdict.
    #[sea_orm(string_value = "tested")]
    Tested,
}

impl TestOutcome {
    pub fn as_serial_status(&self) -> SerialStatus {
        match self {
            TestOutcome::Passed => SerialStatus::Passed,
            TestOutcome::Failed => SerialStatus::Failed,
            TestOutcome::Tested => SerialStatus::Tested,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    OutletToTesting,
    TestingToOutlet,
}

/// One hop in a serial's transfer history. The history is append-only:
/// entries are added and the last entry's status/result may be stamped, but
/// entries are never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub from_location: Uuid,
    pub to_location: Uuid,
    pub date: DateTime<Utc>,
    pub transfer_type: TransferType,
    pub status: SerialStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_result: Option<TestOutcome>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "serial_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Owning ledger row. Serial numbers are unique within one stock entry.
    pub stock_entry_id: Uuid,
    pub serial_number: String,
    pub status: SerialStatus,
    /// Which location physically holds the unit right now. For an outlet-side
    /// record this is the outlet until commit, then the testing center.
    pub current_location_id: Uuid,
    /// Set only on testing-center copies; back-reference to the source
    /// outlet. Never mutates.
    pub original_outlet_id: Option<Uuid>,
    pub testing_request_id: Option<Uuid>,
    pub test_result: Option<TestOutcome>,
    pub test_remark: Option<String>,
    pub tested_at: Option<DateTime<Utc>>,
    pub tested_by: Option<Uuid>,
    #[sea_orm(column_type = "Json")]
    pub transfer_history: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::stock_entry::Entity",
        from = "Column::StockEntryId",
        to = "super::stock_entry::Column::Id"
    )]
    StockEntry,
}

impl Related<super::stock_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockEntry.def()
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
            if let ActiveValue::NotSet = self.transfer_history {
                self.transfer_history = ActiveValue::Set(serde_json::json!([]));
            }
        }
        self.updated_at = ActiveValue::Set(now);
        Ok(self)
    }
}

impl Model {
    /// Decode the transfer history column into typed events.
    pub fn history(&self) -> Result<Vec<TransferEvent>, serde_json::Error> {
        serde_json::from_value(self.transfer_history.clone())
    }
}

/// Encode a history back into the JSON column representation.
pub fn encode_history(history: &[TransferEvent]) -> Result<Json, serde_json::Error> {
    serde_json::to_value(history)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_event_round_trips_through_json() {
        let event = TransferEvent {
            from_location: Uuid::new_v4(),
            to_location: Uuid::new_v4(),
            date: Utc::now(),
            transfer_type: TransferType::OutletToTesting,
            status: SerialStatus::PendingTesting,
            test_result: None,
        };
        let value = encode_history(std::slice::from_ref(&event)).unwrap();
        let decoded: Vec<TransferEvent> = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, vec![event]);
    }

    #[test]
    fn transfer_type_uses_snake_case_wire_names() {
        let json = serde_json::to_string(&TransferType::OutletToTesting).unwrap();
        assert_eq!(json, "\"outlet_to_testing\"");
    }

    #[test]
    fn outcome_maps_onto_serial_status() {
        assert_eq!(TestOutcome::Passed.as_serial_status(), SerialStatus::Passed);
        assert_eq!(TestOutcome::Failed.as_serial_status(), SerialStatus::Failed);
        assert_eq!(TestOutcome::Tested.as_serial_status(), SerialStatus::Tested);
    }
}
