//! Broker registry
//!
//! Process-wide map from broker id to adapter instance, populated once at
//! startup and injected into every component that resolves brokers.

use crate::domain::repositories::broker_client::BrokerClient;
use std::collections::HashMap;
use std::sync::Arc;

pub struct BrokerRegistry {
    brokers: HashMap<String, Arc<dyn BrokerClient>>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self {
            brokers: HashMap::new(),
        }
    }

    pub fn register(&mut self, broker: Arc<dyn BrokerClient>) {
        tracing::info!("registered broker adapter '{}'", broker.id());
        self.brokers.insert(broker.id().to_string(), broker);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn BrokerClient>> {
        self.brokers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.brokers.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.brokers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for BrokerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
