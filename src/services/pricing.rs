use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

/// A cart line as submitted by the client: product reference and quantity
/// only. Prices are never accepted from the client.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LineItemInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// A validated line with name/price/image captured from the catalog at
/// validation time.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LineItemSnapshot {
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub image: Option<String>,
    pub quantity: i32,
}

impl LineItemSnapshot {
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// Outcome of cart validation: ordered snapshots plus the derived subtotal.
#[derive(Debug, Clone)]
pub struct ValidatedCart {
    pub items: Vec<LineItemSnapshot>,
    pub subtotal: Decimal,
}

/// Pricing & stock validator. Read-only: it checks availability and computes
/// authoritative totals but never mutates the catalog.
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DbPool>,
}

impl PricingService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Validates a cart against current catalog state.
    ///
    /// Fails with `ProductNotFound` for unknown or inactive products and
    /// `InsufficientStock` when any line exceeds available stock. The whole
    /// cart is rejected on the first failing line; no partial result is
    /// produced.
    #[instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn validate_cart(
        &self,
        items: &[LineItemInput],
    ) -> Result<ValidatedCart, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::InvalidInput("Cart is empty".to_string()));
        }
        for line in items {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity for product {} must be positive",
                    line.product_id
                )));
            }
        }

        // Lines naming the same product are merged so the stock check (and
        // the later decrement) see the cart-wide quantity per product.
        let items = merge_duplicate_lines(items)?;

        // One batched read for every product in the cart.
        let ids: Vec<Uuid> = items.iter().map(|l| l.product_id).collect();
        let products: HashMap<Uuid, product::Model> = ProductEntity::find()
            .filter(product::Column::Id.is_in(ids))
            .filter(product::Column::IsActive.eq(true))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut snapshots = Vec::with_capacity(items.len());
        let mut subtotal = Decimal::ZERO;

        for line in &items {
            let product = products
                .get(&line.product_id)
                .ok_or(ServiceError::ProductNotFound(line.product_id))?;

            if product.stock < line.quantity {
                return Err(ServiceError::InsufficientStock {
                    product_id: product.id,
                    available: product.stock,
                    requested: line.quantity,
                });
            }

            let snapshot = LineItemSnapshot {
                product_id: product.id,
                name: product.name.clone(),
                price: product.price,
                image: product.primary_image(),
                quantity: line.quantity,
            };
            subtotal += snapshot.line_total();
            snapshots.push(snapshot);
        }

        Ok(ValidatedCart {
            items: snapshots,
            subtotal,
        })
    }
}

/// Collapses repeated product ids into single lines, summing quantities and
/// preserving first-seen order.
fn merge_duplicate_lines(items: &[LineItemInput]) -> Result<Vec<LineItemInput>, ServiceError> {
    let mut merged: Vec<LineItemInput> = Vec::with_capacity(items.len());
    let mut index: HashMap<Uuid, usize> = HashMap::new();

    for line in items {
        match index.entry(line.product_id) {
            Entry::Occupied(slot) => {
                let existing = &mut merged[*slot.get()];
                existing.quantity =
                    existing.quantity.checked_add(line.quantity).ok_or_else(|| {
                        ServiceError::ValidationError(format!(
                            "Quantity for product {} is too large",
                            line.product_id
                        ))
                    })?;
            }
            Entry::Vacant(slot) => {
                slot.insert(merged.len());
                merged.push(line.clone());
            }
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn line_total_multiplies_price_by_quantity() {
        let line = LineItemSnapshot {
            product_id: Uuid::new_v4(),
            name: "Vase en céramique".into(),
            price: dec!(20.00),
            image: None,
            quantity: 2,
        };
        assert_eq!(line.line_total(), dec!(40.00));
    }

    #[test]
    fn duplicate_lines_are_merged_in_first_seen_order() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let lines = vec![
            LineItemInput {
                product_id: first,
                quantity: 2,
            },
            LineItemInput {
                product_id: second,
                quantity: 1,
            },
            LineItemInput {
                product_id: first,
                quantity: 3,
            },
        ];

        let merged = merge_duplicate_lines(&lines).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].product_id, first);
        assert_eq!(merged[0].quantity, 5);
        assert_eq!(merged[1].product_id, second);
        assert_eq!(merged[1].quantity, 1);
    }

    #[test]
    fn merging_rejects_quantity_overflow() {
        let id = Uuid::new_v4();
        let lines = vec![
            LineItemInput {
                product_id: id,
                quantity: i32::MAX,
            },
            LineItemInput {
                product_id: id,
                quantity: 1,
            },
        ];
        assert!(matches!(
            merge_duplicate_lines(&lines),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn line_total_keeps_cent_precision() {
        let line = LineItemSnapshot {
            product_id: Uuid::new_v4(),
            name: "Bougie parfumée".into(),
            price: dec!(12.99),
            image: None,
            quantity: 3,
        };
        assert_eq!(line.line_total(), dec!(38.97));
    }
}
