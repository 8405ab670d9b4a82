use crate::{
    db::DbPool,
    entities::{
        order::{self, OrderStatus},
        order_item::{self, Entity as OrderItemEntity},
        review::{self, Entity as ReviewEntity},
    },
    errors::ServiceError,
    services::products::ProductService,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SubmitReviewRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
    #[validate(length(max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReviewResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: String,
    pub rating: i32,
    pub title: Option<String>,
    pub comment: Option<String>,
    /// True when the reviewer has a fulfilled order containing the product
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Review submission and listing. One review per (user, product); a second
/// submission updates the stored review instead of adding another.
#[derive(Clone)]
pub struct ReviewService {
    db: Arc<DbPool>,
    products: ProductService,
}

impl ReviewService {
    pub fn new(db: Arc<DbPool>) -> Self {
        let products = ProductService::new(db.clone());
        Self { db, products }
    }

    /// Creates or updates the caller's review for a product.
    ///
    /// Returns the stored review and whether it was newly created. The
    /// `verified` flag is computed from order history at creation time and is
    /// not revisited on update.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn submit_review(
        &self,
        user_id: &str,
        request: SubmitReviewRequest,
    ) -> Result<(ReviewResponse, bool), ServiceError> {
        request.validate()?;

        let product = self.products.get_product(request.product_id).await?;

        let existing = ReviewEntity::find()
            .filter(review::Column::UserId.eq(user_id))
            .filter(review::Column::ProductId.eq(product.id))
            .one(&*self.db)
            .await?;

        if let Some(existing) = existing {
            let review_id = existing.id;
            let mut active: review::ActiveModel = existing.into();
            active.rating = Set(request.rating);
            active.title = Set(request.title);
            active.comment = Set(request.comment);
            let updated = active.update(&*self.db).await?;

            info!(review_id = %review_id, product_id = %product.id, "Review updated");
            return Ok((Self::to_response(updated), false));
        }

        let verified = self.has_purchased(user_id, product.id).await?;
        let model = review::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id.to_string()),
            product_id: Set(product.id),
            rating: Set(request.rating),
            title: Set(request.title),
            comment: Set(request.comment),
            verified: Set(verified),
            ..Default::default()
        };
        let saved = model.insert(&*self.db).await?;

        info!(review_id = %saved.id, product_id = %product.id, verified, "Review created");
        Ok((Self::to_response(saved), true))
    }

    /// Reviews for a product, newest first.
    #[instrument(skip(self))]
    pub async fn list_reviews(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<ReviewResponse>, ServiceError> {
        let reviews = ReviewEntity::find()
            .filter(review::Column::ProductId.eq(product_id))
            .order_by_desc(review::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(reviews.into_iter().map(Self::to_response).collect())
    }

    /// Whether the user has an order containing the product in a
    /// post-payment status.
    async fn has_purchased(&self, user_id: &str, product_id: Uuid) -> Result<bool, ServiceError> {
        let fulfilled = [OrderStatus::Paid, OrderStatus::Shipped, OrderStatus::Delivered];
        let count = OrderItemEntity::find()
            .filter(order_item::Column::ProductId.eq(product_id))
            .inner_join(order::Entity)
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Status.is_in(fulfilled))
            .count(&*self.db)
            .await?;
        Ok(count > 0)
    }

    fn to_response(model: review::Model) -> ReviewResponse {
        ReviewResponse {
            id: model.id,
            product_id: model.product_id,
            user_id: model.user_id,
            rating: model.rating,
            title: model.title,
            comment: model.comment,
            verified: model.verified,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
