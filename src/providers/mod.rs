//! Provider gateways
//!
//! This module provides the outbound side of the three provider
//! integrations:
//! - The `ProviderGateway` trait defining the capability interface every
//!   provider implements (code exchange, refresh, subscribe, cancel, fetch)
//! - Static per-provider descriptors and the registry for lookup
//! - Individual gateway implementations

pub mod descriptor;
pub mod google;
pub mod outlook;
pub mod registry;
pub mod smartthings;
pub mod trait_;

pub use descriptor::ProviderDescriptor;
pub use registry::{ProviderRegistry, RegistryError};
pub use trait_::{
    CancelRequest, ProviderApiError, ProviderGateway, RemoteSubscription, SubscribeRequest,
    TokenGrant,
};

pub use google::GoogleCalendarGateway;
pub use outlook::OutlookCalendarGateway;
pub use smartthings::SmartThingsGateway;
