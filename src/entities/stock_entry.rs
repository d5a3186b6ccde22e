use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-(location, product) stock ledger row.
///
/// Two entries may exist for the same product: one keyed by the outlet, one by
/// the testing center. They are linked only through serial numbers and the
/// testing request id, never by direct reference.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub location_id: Uuid,
    pub product_id: Uuid,
    pub total: i32,
    pub available: i32,
    pub pending_testing: i32,
    pub under_testing: i32,
    pub tested: i32,
    pub passed: i32,
    pub failed: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(
        belongs_to = "super::location::Entity",
        from = "Column::LocationId",
        to = "super::location::Column::Id"
    )]
    Location,
    #[sea_orm(has_many = "super::serial_record::Entity")]
    SerialRecords,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::location::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Location.def()
    }
}

impl Related<super::serial_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SerialRecords.def()
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
        }
        self.updated_at = ActiveValue::Set(now);
        Ok(self)
    }
}

impl Model {
    /// True if every counter is non-negative. Counters must never go below
    /// zero; a violation means a ledger mutation was applied out of order.
    pub fn counters_non_negative(&self) -> bool {
        self.total >= 0
            && self.available >= 0
            && self.pending_testing >= 0
            && self.under_testing >= 0
            && self.tested >= 0
            && self.passed >= 0
            && self.failed >= 0
    }

    /// Quantity currently in some testing stage at this ledger.
    pub fn in_testing_stages(&self) -> i32 {
        self.under_testing + self.tested + self.passed + self.failed
    }
}
