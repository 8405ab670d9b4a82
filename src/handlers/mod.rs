pub mod categories;
pub mod checkout;
pub mod common;
pub mod newsletter;
pub mod orders;
pub mod products;
pub mod reviews;
pub mod webhooks;
