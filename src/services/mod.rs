pub mod categories;
pub mod checkout;
pub mod newsletter;
pub mod orders;
pub mod pricing;
pub mod products;
pub mod reviews;
pub mod stripe;
pub mod webhooks;
