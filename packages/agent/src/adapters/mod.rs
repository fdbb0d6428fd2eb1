//! Subsystem adapters: the uniform contract the dispatcher's apply pipeline
//! drives every configurable section through.
//!
//! Each adapter owns one [`ConfigSection`] and answers five questions about
//! it — what's running, is a proposed config valid, what would change, make
//! it so, undo the last change — plus a sixth for the collector: what
//! metrics does this section have right now. The dispatcher is the sole
//! owner of the registry this module builds; other tasks that need a
//! section's metrics go through the dispatcher's collection channel rather
//! than touching an adapter directly (see `collector.rs`).

mod generic;
pub mod dns;
pub mod firewall;
pub mod lan;
pub mod routing;
pub mod system;
pub mod vpn;
pub mod wan;
pub mod wifi;

pub use dns::DnsAdapter;
pub use firewall::FirewallAdapter;
pub use lan::LanAdapter;
pub use routing::RoutingAdapter;
pub use system::SystemAdapter;
pub use vpn::VpnAdapter;
pub use wan::WanAdapter;
pub use wifi::WifiAdapter;

use std::collections::HashMap;

use ngfw_protocol::{ConfigDiffWire, ConfigSection, FieldChange, IssueSeverity, ValidationIssueWire};
use serde_json::Value;

use crate::config::AdaptersSection;

/// A single finding from `validate()`. `Error`-severity issues reject a
/// `takeover`-mode apply outright; `Warning` issues are surfaced but do not
/// block it.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub severity: IssueSeverity,
}

impl ValidationIssue {
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into(), severity: IssueSeverity::Error }
    }

    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into(), severity: IssueSeverity::Warning }
    }
}

/// The delta between the running configuration and a proposed configuration.
#[derive(Debug, Clone)]
pub struct ConfigDiff {
    pub section: ConfigSection,
    pub additions: Vec<String>,
    pub removals: Vec<String>,
    /// Each tuple is (field, old value, new value), rendered as strings for
    /// display — the wire form ([`ngfw_protocol::ConfigDiffWire`]) is the
    /// same shape.
    pub changes: Vec<(String, String, String)>,
}

impl ConfigDiff {
    pub fn empty(section: ConfigSection) -> Self {
        Self { section, additions: Vec::new(), removals: Vec::new(), changes: Vec::new() }
    }
}

impl From<ValidationIssue> for ValidationIssueWire {
    fn from(issue: ValidationIssue) -> Self {
        Self { field: issue.field, message: issue.message, severity: issue.severity }
    }
}

impl From<ConfigDiff> for ConfigDiffWire {
    fn from(diff: ConfigDiff) -> Self {
        Self {
            additions: diff.additions,
            removals: diff.removals,
            changes: diff
                .changes
                .into_iter()
                .map(|(field, old, new)| FieldChange { field, old, new })
                .collect(),
        }
    }
}

/// Uniform interface implemented by every subsystem adapter.
#[async_trait::async_trait]
pub trait SubsystemAdapter: Send + Sync {
    /// Which configuration section this adapter owns.
    fn section(&self) -> ConfigSection;

    /// Read the current running configuration.
    async fn read_config(&self) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>;

    /// Validate a proposed configuration without applying it.
    async fn validate(
        &self,
        config: &Value,
    ) -> Result<Vec<ValidationIssue>, Box<dyn std::error::Error + Send + Sync>>;

    /// Compute the diff between the running config and a proposed config.
    async fn diff(
        &self,
        proposed: &Value,
    ) -> Result<ConfigDiff, Box<dyn std::error::Error + Send + Sync>>;

    /// Apply a configuration atomically and tag it with `version`.
    async fn apply(
        &self,
        config: &Value,
        version: u64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Roll back to the configuration in place before the last successful
    /// `apply()`. Takes no arguments: each adapter is responsible for
    /// remembering its own last-good state.
    async fn rollback(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Collect runtime metrics from this subsystem.
    async fn collect_metrics(&self) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>;
}

/// Build the adapter registry, one entry per section enabled in
/// `[adapters]`. A section with no adapter registered behaves, from the
/// dispatcher's point of view, as `ConfigOutcome::UnknownSection`.
pub fn build_registry(adapters: &AdaptersSection) -> HashMap<ConfigSection, Box<dyn SubsystemAdapter>> {
    let mut registry: HashMap<ConfigSection, Box<dyn SubsystemAdapter>> = HashMap::new();

    if adapters.enabled(ConfigSection::System) {
        registry.insert(ConfigSection::System, Box::new(SystemAdapter::new()));
    }
    if adapters.enabled(ConfigSection::Firewall) {
        registry.insert(ConfigSection::Firewall, Box::new(FirewallAdapter::new()));
    }
    if adapters.enabled(ConfigSection::Dns) {
        registry.insert(ConfigSection::Dns, Box::new(DnsAdapter::new()));
    }
    if adapters.enabled(ConfigSection::Wifi) {
        registry.insert(ConfigSection::Wifi, Box::new(WifiAdapter::new()));
    }
    if adapters.enabled(ConfigSection::Vpn) {
        registry.insert(ConfigSection::Vpn, Box::new(VpnAdapter::new()));
    }
    if adapters.enabled(ConfigSection::Routing) {
        registry.insert(ConfigSection::Routing, Box::new(RoutingAdapter::new()));
    }
    if adapters.enabled(ConfigSection::Wan) {
        registry.insert(ConfigSection::Wan, Box::new(WanAdapter::new()));
    }
    if adapters.enabled(ConfigSection::Lan) {
        registry.insert(ConfigSection::Lan, Box::new(LanAdapter::new()));
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_respects_disabled_sections() {
        let mut adapters = AdaptersSection::default();
        adapters.firewall = false;
        let registry = build_registry(&adapters);
        assert!(!registry.contains_key(&ConfigSection::Firewall));
        assert!(registry.contains_key(&ConfigSection::System));
    }

    #[test]
    fn registry_includes_every_enabled_section() {
        let mut adapters = AdaptersSection::default();
        adapters.vpn = true;
        adapters.routing = true;
        let registry = build_registry(&adapters);
        assert_eq!(registry.len(), 8);
    }
}
