use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus},
        order_item::{self, Entity as OrderItemEntity},
        product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{LineItemInput, LineItemSnapshot, PricingService},
};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Subtotal at or above which shipping is free.
pub const FREE_SHIPPING_THRESHOLD: Decimal = dec!(50);
/// Flat standard shipping rate below the free-shipping threshold.
pub const STANDARD_SHIPPING_RATE: Decimal = dec!(4.99);

const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// Shipping destination captured with the order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    #[validate(length(min = 1, max = 200))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 2))]
    pub country: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<LineItemInput>,
    #[validate]
    pub shipping_address: ShippingAddress,
    #[validate(length(min = 1, max = 50))]
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub image: Option<String>,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    pub payment_method: String,
    pub payment_id: Option<String>,
    pub shipping_address: serde_json::Value,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
}

/// Order aggregator: validates the cart, derives totals, persists the order
/// with snapshot line items, then decrements stock.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    pricing: PricingService,
    event_sender: EventSender,
}

/// Shipping cost for a given subtotal.
pub fn shipping_for(subtotal: Decimal) -> Decimal {
    if subtotal >= FREE_SHIPPING_THRESHOLD {
        Decimal::ZERO
    } else {
        STANDARD_SHIPPING_RATE
    }
}

/// `ORD-<epoch millis>-<4 random uppercase alphanumerics>`.
fn generate_order_number() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("ORD-{}-{}", Utc::now().timestamp_millis(), suffix)
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        let pricing = PricingService::new(db.clone());
        Self {
            db,
            pricing,
            event_sender,
        }
    }

    /// Places an order for `user_id`.
    ///
    /// The cart is re-priced from the catalog; any unknown product or
    /// insufficient stock rejects the whole order before anything is written.
    /// Order and line items are inserted in one transaction; stock is
    /// decremented afterwards with guarded conditional updates.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn create_order(
        &self,
        user_id: &str,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;

        let cart = self.pricing.validate_cart(&request.items).await?;
        let shipping = shipping_for(cart.subtotal);
        let total = cart.subtotal + shipping;

        let order_number = self.unique_order_number().await?;
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let shipping_address = serde_json::to_value(&request.shipping_address)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;

        let txn = self.db.begin().await?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            user_id: Set(user_id.to_string()),
            status: Set(OrderStatus::Pending),
            subtotal: Set(cart.subtotal),
            shipping: Set(shipping),
            total: Set(total),
            payment_method: Set(request.payment_method),
            payment_id: Set(None),
            shipping_address: Set(shipping_address),
            created_at: Set(now),
            updated_at: Set(None),
        };
        let saved = order_model.insert(&txn).await?;

        for line in &cart.items {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                name: Set(line.name.clone()),
                price: Set(line.price),
                image: Set(line.image.clone()),
                quantity: Set(line.quantity),
                created_at: Set(now),
            };
            item.insert(&txn).await?;
        }

        txn.commit().await?;

        info!(
            order_id = %order_id,
            order_number = %saved.order_number,
            total = %total,
            "Order created"
        );

        self.decrement_stock(&cart.items).await;

        if let Err(e) = self.event_sender.send(Event::OrderCreated(order_id)).await {
            warn!(order_id = %order_id, error = %e, "Failed to publish OrderCreated event");
        }

        Ok(Self::to_response(saved, &cart.items))
    }

    /// Decrements stock for each ordered line, in parallel. Each update is
    /// guarded (`stock >= quantity`), so stock never goes negative; a line
    /// that lost the race is logged and skipped, the order itself stands.
    async fn decrement_stock(&self, items: &[LineItemSnapshot]) {
        let updates = items.iter().map(|line| {
            let db = self.db.clone();
            async move {
                let result = product::Entity::update_many()
                    .col_expr(
                        product::Column::Stock,
                        Expr::col(product::Column::Stock).sub(line.quantity),
                    )
                    .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(product::Column::Id.eq(line.product_id))
                    .filter(product::Column::Stock.gte(line.quantity))
                    .exec(&*db)
                    .await;
                (line, result)
            }
        });

        for (line, result) in futures::future::join_all(updates).await {
            match result {
                Ok(res) if res.rows_affected == 0 => {
                    warn!(
                        product_id = %line.product_id,
                        quantity = line.quantity,
                        "Stock decrement skipped: concurrent sale exhausted stock"
                    );
                }
                Ok(_) => {
                    if let Ok(Some(p)) = product::Entity::find_by_id(line.product_id)
                        .one(&*self.db)
                        .await
                    {
                        if p.stock == 0 {
                            if let Err(e) = self
                                .event_sender
                                .send(Event::StockDepleted {
                                    product_id: line.product_id,
                                })
                                .await
                            {
                                warn!(error = %e, "Failed to publish StockDepleted event");
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(
                        product_id = %line.product_id,
                        error = %e,
                        "Stock decrement failed"
                    );
                }
            }
        }
    }

    async fn unique_order_number(&self) -> Result<String, ServiceError> {
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let candidate = generate_order_number();
            let exists = OrderEntity::find()
                .filter(order::Column::OrderNumber.eq(candidate.clone()))
                .count(&*self.db)
                .await?;
            if exists == 0 {
                return Ok(candidate);
            }
        }
        Err(ServiceError::InternalError(
            "Could not generate a unique order number".to_string(),
        ))
    }

    /// Orders for a user, newest first, with line items.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_orders(&self, user_id: &str) -> Result<Vec<OrderResponse>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .find_with_related(OrderItemEntity)
            .all(&*self.db)
            .await?;

        Ok(orders
            .into_iter()
            .map(|(o, items)| Self::to_response_with_items(o, items))
            .collect())
    }

    /// A single order, scoped to its owner. Another user's order id resolves
    /// to `NotFound`, never a 403, so ids cannot be probed.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn get_order(
        &self,
        user_id: &str,
        order_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        Ok(Self::to_response_with_items(order, items))
    }

    /// Transitions an order to PAID and records the payment reference.
    ///
    /// Idempotent: an order already PAID is left untouched and `Ok(false)`
    /// is returned. `Ok(true)` means this call performed the transition.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_order_paid(
        &self,
        order_id: Uuid,
        payment_id: Option<String>,
    ) -> Result<bool, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        if order.status == OrderStatus::Paid {
            info!(order_id = %order_id, "Order already paid, skipping");
            return Ok(false);
        }

        let old_status = order.status;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Paid);
        active.payment_id = Set(payment_id.clone());
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;

        info!(order_id = %order_id, ?old_status, "Order marked as paid");

        if let Err(e) = self
            .event_sender
            .send(Event::OrderPaid {
                order_id,
                payment_id,
            })
            .await
        {
            warn!(order_id = %order_id, error = %e, "Failed to publish OrderPaid event");
        }

        Ok(true)
    }

    fn to_response(model: order::Model, items: &[LineItemSnapshot]) -> OrderResponse {
        let items = items
            .iter()
            .map(|line| OrderItemResponse {
                product_id: line.product_id,
                name: line.name.clone(),
                price: line.price,
                image: line.image.clone(),
                quantity: line.quantity,
            })
            .collect();
        Self::build_response(model, items)
    }

    fn to_response_with_items(
        model: order::Model,
        items: Vec<order_item::Model>,
    ) -> OrderResponse {
        let items = items
            .into_iter()
            .map(|item| OrderItemResponse {
                product_id: item.product_id,
                name: item.name,
                price: item.price,
                image: item.image,
                quantity: item.quantity,
            })
            .collect();
        Self::build_response(model, items)
    }

    fn build_response(model: order::Model, items: Vec<OrderItemResponse>) -> OrderResponse {
        OrderResponse {
            id: model.id,
            order_number: model.order_number,
            status: model.status,
            subtotal: model.subtotal,
            shipping: model.shipping,
            total: model.total,
            payment_method: model.payment_method,
            payment_id: model.payment_id,
            shipping_address: model.shipping_address,
            items,
            created_at: model.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipping_is_free_at_threshold() {
        assert_eq!(shipping_for(dec!(50.00)), Decimal::ZERO);
        assert_eq!(shipping_for(dec!(120.50)), Decimal::ZERO);
    }

    #[test]
    fn shipping_is_flat_rate_below_threshold() {
        assert_eq!(shipping_for(dec!(49.99)), dec!(4.99));
        assert_eq!(shipping_for(dec!(0.01)), dec!(4.99));
    }

    #[test]
    fn order_number_format() {
        let n = generate_order_number();
        let parts: Vec<&str> = n.splitn(3, '-').collect();
        assert_eq!(parts[0], "ORD");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
