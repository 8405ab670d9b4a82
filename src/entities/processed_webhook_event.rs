use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Idempotency ledger for inbound payment-provider webhooks. Append-only; a
/// row's presence means the event's business effect has already been applied.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "processed_webhook_events")]
pub struct Model {
    /// Provider-assigned event id (e.g. `evt_...`), the dedup key
    #[sea_orm(primary_key, auto_increment = false)]
    pub external_event_id: String,
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
    #[sea_orm(column_type = "Json", nullable)]
    pub metadata: Option<Json>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
