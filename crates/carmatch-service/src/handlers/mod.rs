//! API handlers.

pub mod accounts;
pub mod credits;
pub mod cron;
pub mod health;
pub mod listings;
pub mod webhooks;
