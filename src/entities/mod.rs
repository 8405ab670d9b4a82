pub mod category;
pub mod newsletter_subscriber;
pub mod order;
pub mod order_item;
pub mod processed_webhook_event;
pub mod product;
pub mod review;
