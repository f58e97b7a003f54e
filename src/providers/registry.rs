//! Provider registry
//!
//! In-memory registry for storing and retrieving provider gateways. Built
//! explicitly at startup and passed down to the components that need it, so
//! tests can assemble registries around mock endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::providers::descriptor::ProviderDescriptor;
use crate::providers::trait_::ProviderGateway;
use crate::providers::{GoogleCalendarGateway, OutlookCalendarGateway, SmartThingsGateway};

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("provider '{slug}' not found")]
    ProviderNotFound { slug: String },
}

/// Registry mapping provider slugs to their gateways
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    gateways: HashMap<String, Arc<dyn ProviderGateway>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            gateways: HashMap::new(),
        }
    }

    /// Builds a registry holding the three built-in gateways from config
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        let timeout = config.provider_http_timeout_ms;

        if let Some(settings) = config.providers.get(GoogleCalendarGateway::SLUG) {
            let descriptor =
                ProviderDescriptor::from_settings(GoogleCalendarGateway::SLUG, settings, timeout);
            registry.register(Arc::new(GoogleCalendarGateway::new(descriptor)));
        }
        if let Some(settings) = config.providers.get(OutlookCalendarGateway::SLUG) {
            let descriptor =
                ProviderDescriptor::from_settings(OutlookCalendarGateway::SLUG, settings, timeout);
            registry.register(Arc::new(OutlookCalendarGateway::new(descriptor)));
        }
        if let Some(settings) = config.providers.get(SmartThingsGateway::SLUG) {
            let descriptor =
                ProviderDescriptor::from_settings(SmartThingsGateway::SLUG, settings, timeout);
            registry.register(Arc::new(SmartThingsGateway::new(descriptor)));
        }

        registry
    }

    /// Register a gateway under its descriptor slug
    pub fn register(&mut self, gateway: Arc<dyn ProviderGateway>) {
        self.gateways
            .insert(gateway.descriptor().slug.clone(), gateway);
    }

    /// Look up a gateway by provider slug
    pub fn get(&self, slug: &str) -> Result<Arc<dyn ProviderGateway>, RegistryError> {
        self.gateways
            .get(slug)
            .cloned()
            .ok_or_else(|| RegistryError::ProviderNotFound {
                slug: slug.to_string(),
            })
    }

    /// True when a gateway is registered for the slug
    pub fn contains(&self, slug: &str) -> bool {
        self.gateways.contains_key(slug)
    }

    /// All registered provider slugs, sorted
    pub fn slugs(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self.gateways.keys().cloned().collect();
        slugs.sort();
        slugs
    }
}
