//! LAN section adapter (subnet, DHCP range, VLANs). No teacher counterpart
//! exists — this section was added by the fleet-management redesign — so
//! it wraps the shared in-memory config store like every other
//! configurable section.

use ngfw_protocol::ConfigSection;
use serde_json::Value;

use super::generic::GenericSectionAdapter;
use super::{ConfigDiff, SubsystemAdapter, ValidationIssue};

pub struct LanAdapter(GenericSectionAdapter);

impl LanAdapter {
    pub fn new() -> Self {
        Self(GenericSectionAdapter::new(ConfigSection::Lan))
    }
}

impl Default for LanAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SubsystemAdapter for LanAdapter {
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
