//! HTTP route handlers.

pub mod health;
pub mod load_balancers;
pub mod metrics;
