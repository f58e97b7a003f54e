//! Database entity models
//!
//! SeaORM entities for the two persisted lifecycle records: credentials and
//! push subscriptions.

pub mod credential;
pub mod subscription;
