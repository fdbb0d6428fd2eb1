//! WiFi section adapter. The real backing mechanism (radio/SSID/security
//! settings, typically `nvram` on this class of router) is out of scope;
//! this wraps the shared in-memory config store with the `wifi` section
//! identity.

use ngfw_protocol::ConfigSection;
use serde_json::Value;

use super::generic::GenericSectionAdapter;
use super::{ConfigDiff, SubsystemAdapter, ValidationIssue};

pub struct WifiAdapter(GenericSectionAdapter);

impl WifiAdapter {
    pub fn new() -> Self {
        Self(GenericSectionAdapter::new(ConfigSection::Wifi))
    }
}

impl Default for WifiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SubsystemAdapter for WifiAdapter {
    fn section(&self) -> ConfigSection {
        self.0.section()
    }

    async fn read_config(&self) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        self.0.read_config().await
    }

    async fn validate(
        &self,
        config: &Value,
    ) -> Result<Vec<ValidationIssue>, Box<dyn std::error::Error + Send + Sync>> {
        self.0.validate(config).await
    }

    async fn diff(&self, proposed: &Value) -> Result<ConfigDiff, Box<dyn std::error::Error + Send + Sync>> {
        self.0.diff(proposed).await
    }

    async fn apply(&self, config: &Value, version: u64) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.0.apply(config, version).await
    }

    async fn rollback(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.0.rollback().await
    }

    async fn collect_metrics(&self) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        self.0.collect_metrics().await
    }
}
