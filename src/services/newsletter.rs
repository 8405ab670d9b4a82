use crate::{
    db::DbPool,
    entities::newsletter_subscriber::{self, Entity as SubscriberEntity},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{sea_query::OnConflict, DbErr, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SubscribeRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionResponse {
    pub email: String,
    pub subscribed_at: DateTime<Utc>,
}

/// Newsletter subscription storage.
#[derive(Clone)]
pub struct NewsletterService {
    db: Arc<DbPool>,
}

impl NewsletterService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Stores a subscription. Emails are normalized to lowercase; an already
    /// subscribed email is rejected. The uniqueness race is closed by the
    /// on-conflict insert, not a prior read.
    #[instrument(skip(self, request))]
    pub async fn subscribe(
        &self,
        request: SubscribeRequest,
    ) -> Result<SubscriptionResponse, ServiceError> {
        let normalized = SubscribeRequest {
            email: request.email.trim().to_lowercase(),
        };
        normalized.validate()?;
        let email = normalized.email;
        let now = Utc::now();

        let model = newsletter_subscriber::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.clone()),
            created_at: Set(now),
        };
        let insert = SubscriberEntity::insert(model)
            .on_conflict(
                OnConflict::column(newsletter_subscriber::Column::Email)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&*self.db)
            .await;

        match insert {
            Ok(_) => {
                info!(%email, "Newsletter subscription stored");
                Ok(SubscriptionResponse {
                    email,
                    subscribed_at: now,
                })
            }
            Err(DbErr::RecordNotInserted) => Err(ServiceError::InvalidOperation(
                "Email is already subscribed".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_format_is_validated() {
        let ok = SubscribeRequest {
            email: "claire@example.com".to_string(),
        };
        assert!(ok.validate().is_ok());

        let bad = SubscribeRequest {
            email: "not-an-email".to_string(),
        };
        assert!(bad.validate().is_err());
    }
}
