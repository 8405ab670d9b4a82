use crate::{
    db::DbPool,
    entities::processed_webhook_event::{self, Entity as ProcessedEventEntity},
    errors::ServiceError,
};
use chrono::{Duration, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DbErr, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::{info, instrument};

/// Durable ledger of processed webhook event ids, keyed by the provider's
/// event id. Deliveries already present here are acknowledged without being
/// re-applied.
#[derive(Clone)]
pub struct WebhookLedger {
    db: Arc<DbPool>,
}

impl WebhookLedger {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn is_event_processed(&self, event_id: &str) -> Result<bool, ServiceError> {
        let found = ProcessedEventEntity::find_by_id(event_id.to_string())
            .one(&*self.db)
            .await?;
        Ok(found.is_some())
    }

    /// Records an event id in the ledger. A concurrent insert of the same id
    /// is not an error; the ledger only needs the row to exist.
    #[instrument(skip(self, metadata))]
    pub async fn mark_event_processed(
        &self,
        event_id: &str,
        event_type: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), ServiceError> {
        let row = processed_webhook_event::ActiveModel {
            external_event_id: Set(event_id.to_string()),
            event_type: Set(event_type.to_string()),
            processed_at: Set(Utc::now()),
            metadata: Set(metadata),
        };

        let result = ProcessedEventEntity::insert(row)
            .on_conflict(
                OnConflict::column(processed_webhook_event::Column::ExternalEventId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&*self.db)
            .await;

        match result {
            Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes ledger rows older than the retention window. Returns the
    /// number of rows removed.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self, retention_days: i64) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let result = ProcessedEventEntity::delete_many()
            .filter(processed_webhook_event::Column::ProcessedAt.lt(cutoff))
            .exec(&*self.db)
            .await?;
        if result.rows_affected > 0 {
            info!(
                removed = result.rows_affected,
                retention_days, "Pruned expired webhook ledger entries"
            );
        }
        Ok(result.rows_affected)
    }
}
