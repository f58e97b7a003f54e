//! Repository layer
//!
//! Repositories encapsulate SeaORM operations for the lifecycle tables. The
//! credential repository owns encryption at rest; the subscription repository
//! is a plain keyed store with no invariants of its own.

pub mod credential;
pub mod subscription;

pub use credential::{Credential, CredentialRepository, NewCredential};
pub use subscription::{NewSubscription, SubscriptionPatch, SubscriptionRepository};
