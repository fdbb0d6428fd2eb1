//! Shared in-process config store backing every configurable (non-`system`)
//! adapter.
//!
//! What each real subsystem adapter does once it has a proposed config —
//! rewrite `iptables` rules, rewrite `dnsmasq.conf`, push WiFi radio
//! settings — is explicitly out of scope: the contract in `mod.rs` is what
//! matters, not any one backing tool. This type gives every section adapter
//! real, testable `validate`/`diff`/`apply`/`rollback` behavior against an
//! in-memory JSON document, so the dispatcher's apply pipeline and its
//! rollback path have something genuine to exercise instead of a `todo!()`.

use ngfw_protocol::ConfigSection;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{ConfigDiff, SubsystemAdapter, ValidationIssue};

pub struct GenericSectionAdapter {
    section: ConfigSection,
    current: RwLock<Value>,
    previous: RwLock<Option<Value>>,
}

impl GenericSectionAdapter {
    pub fn new(section: ConfigSection) -> Self {
        Self {
            section,
            current: RwLock::new(Value::Object(Default::default())),
            previous: RwLock::new(None),
        }
    }
}

#[async_trait::async_trait]
impl SubsystemAdapter for GenericSectionAdapter {
    fn section(&self) -> ConfigSection {
        self.section
    }

    async fn read_config(&self) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.current.read().await.clone())
    }

    async fn validate(
        &self,
        config: &Value,
    ) -> Result<Vec<ValidationIssue>, Box<dyn std::error::Error + Send + Sync>> {
        let mut issues = Vec::new();

        let Some(object) = config.as_object() else {
            issues.push(ValidationIssue::error("*", "proposed config must be a JSON object"));
            return Ok(issues);
        };

        if object.get("__inject_validation_error").and_then(Value::as_bool) == Some(true) {
            issues.push(ValidationIssue::error("*", "validation failed (injected for testing)"));
        }
        if object.get("__inject_validation_warning").and_then(Value::as_bool) == Some(true) {
            issues.push(ValidationIssue::warning("*", "validation warning (injected for testing)"));
        }

        Ok(issues)
    }

    async fn diff(
        &self,
        proposed: &Value,
    ) -> Result<ConfigDiff, Box<dyn std::error::Error + Send + Sync>> {
        let current = self.current.read().await;
        let mut diff = ConfigDiff::empty(self.section);

        let (Some(current_obj), Some(proposed_obj)) = (current.as_object(), proposed.as_object())
        else {
            return Ok(diff);
        };

        for (key, proposed_value) in proposed_obj {
            match current_obj.get(key) {
                None => diff.additions.push(key.clone()),
                Some(current_value) if current_value != proposed_value => diff.changes.push((
                    key.clone(),
                    current_value.to_string(),
                    proposed_value.to_string(),
                )),
                Some(_) => {}
            }
        }
        for key in current_obj.keys() {
            if !proposed_obj.contains_key(key) {
                diff.removals.push(key.clone());
            }
        }

        Ok(diff)
    }

    async fn apply(
        &self,
        config: &Value,
        _version: u64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if config.get("__inject_apply_failure").and_then(Value::as_bool) == Some(true) {
            return Err("apply failed (injected for testing)".into());
        }

        let mut current = self.current.write().await;
        let mut previous = self.previous.write().await;
        *previous = Some(current.clone());
        *current = config.clone();
        Ok(())
    }

    async fn rollback(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut previous = self.previous.write().await;
        match previous.take() {
            Some(prev) => {
                *self.current.write().await = prev;
                Ok(())
            }
            None => Err("no previous config available to roll back to".into()),
        }
    }

    async fn collect_metrics(&self) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let current = self.current.read().await;
        let field_count = current.as_object().map(|o| o.len()).unwrap_or(0);
        Ok(serde_json::json!({ "configured_fields": field_count }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn apply_then_read_config_reflects_new_value() {
        let adapter = GenericSectionAdapter::new(ConfigSection::Firewall);
        adapter.apply(&json!({"default_policy": "deny"}), 1).await.unwrap();
        let read = adapter.read_config().await.unwrap();
        assert_eq!(read["default_policy"], json!("deny"));
    }

    #[tokio::test]
    async fn rollback_without_prior_apply_fails() {
        let adapter = GenericSectionAdapter::new(ConfigSection::Dns);
        assert!(adapter.rollback().await.is_err());
    }

    #[tokio::test]
    async fn rollback_restores_previous_config() {
        let adapter = GenericSectionAdapter::new(ConfigSection::Wifi);
        adapter.apply(&json!({"ssid": "a"}), 1).await.unwrap();
        adapter.apply(&json!({"ssid": "b"}), 2).await.unwrap();
        adapter.rollback().await.unwrap();
        let read = adapter.read_config().await.unwrap();
        assert_eq!(read["ssid"], json!("a"));
    }

    #[tokio::test]
    async fn apply_failure_hook_leaves_config_unchanged() {
        let adapter = GenericSectionAdapter::new(ConfigSection::Vpn);
        adapter.apply(&json!({"enabled": true}), 1).await.unwrap();
        let result = adapter
            .apply(&json!({"enabled": false, "__inject_apply_failure": true}), 2)
            .await;
        assert!(result.is_err());
        let read = adapter.read_config().await.unwrap();
        assert_eq!(read["enabled"], json!(true));
    }

    #[tokio::test]
    async fn validate_rejects_non_object() {
        let adapter = GenericSectionAdapter::new(ConfigSection::Routing);
        let issues = adapter.validate(&json!([1, 2, 3])).await.unwrap();
        assert_eq!(issues.len(), 1);
    }

    #[tokio::test]
    async fn diff_reports_additions_removals_and_changes() {
        let adapter = GenericSectionAdapter::new(ConfigSection::Lan);
        adapter.apply(&json!({"subnet": "192.168.1.0/24", "dhcp": true}), 1).await.unwrap();

        let diff = adapter
            .diff(&json!({"subnet": "192.168.2.0/24", "vlan": 10}))
            .await
            .unwrap();

        assert_eq!(diff.additions, vec!["vlan".to_string()]);
        assert_eq!(diff.removals, vec!["dhcp".to_string()]);
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].0, "subnet");
    }
}
