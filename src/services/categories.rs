use crate::{
    db::DbPool,
    entities::{
        category::{self, Entity as CategoryEntity},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CategoryResponse {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub image: Option<String>,
    /// Number of active products in the category
    pub product_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Read-side category access, with per-category active-product counts.
#[derive(Clone)]
pub struct CategoryService {
    db: Arc<DbPool>,
}

impl CategoryService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// All categories, name ascending. Counts only cover active products.
    #[instrument(skip(self))]
    pub async fn list_categories(&self) -> Result<Vec<CategoryResponse>, ServiceError> {
        let categories = CategoryEntity::find()
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?;

        let counts: Vec<(Option<Uuid>, i64)> = ProductEntity::find()
            .select_only()
            .column(product::Column::CategoryId)
            .column_as(product::Column::Id.count(), "count")
            .filter(product::Column::IsActive.eq(true))
            .group_by(product::Column::CategoryId)
            .into_tuple()
            .all(&*self.db)
            .await?;
        let counts: HashMap<Uuid, i64> = counts
            .into_iter()
            .filter_map(|(id, n)| id.map(|id| (id, n)))
            .collect();

        Ok(categories
            .into_iter()
            .map(|c| CategoryResponse {
                product_count: counts.get(&c.id).copied().unwrap_or(0),
                id: c.id,
                name: c.name,
                slug: c.slug,
                description: c.description,
                image: c.image,
                created_at: c.created_at,
            })
            .collect())
    }
}
