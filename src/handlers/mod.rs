pub mod health_handlers;
pub mod listing_handlers;
pub mod rate_limit;
