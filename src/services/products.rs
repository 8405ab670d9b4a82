use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

const MAX_PAGE_SIZE: u64 = 100;

/// Read-side catalog access for the storefront. Only active products are
/// ever returned.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DbPool>,
}

impl ProductService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Paginated catalog listing, newest first. `page` is 1-based.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        page: u64,
        limit: u64,
        featured: Option<bool>,
        category_id: Option<Uuid>,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let mut query = ProductEntity::find()
            .filter(product::Column::IsActive.eq(true))
            .order_by_desc(product::Column::CreatedAt);

        if let Some(featured) = featured {
            query = query.filter(product::Column::Featured.eq(featured));
        }
        if let Some(category_id) = category_id {
            query = query.filter(product::Column::CategoryId.eq(category_id));
        }

        let paginator = query.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page - 1).await?;

        Ok((products, total))
    }

    #[instrument(skip(self))]
    pub async fn get_product_by_slug(&self, slug: &str) -> Result<product::Model, ServiceError> {
        ProductEntity::find()
            .filter(product::Column::Slug.eq(slug))
            .filter(product::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product '{slug}' not found")))
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        ProductEntity::find_by_id(id)
            .filter(product::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::ProductNotFound(id))
    }
}
