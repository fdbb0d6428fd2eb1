//! System adapter — read-only host metrics from `/proc` and `/sys`.
//!
//! Unlike every other section, `system` has no configuration to push: it
//! only reports CPU, memory, temperature, and interface counters to the
//! collector. `validate`/`apply`/`rollback` all reject, matching a
//! read-only section's place in the apply pipeline (mode gating is moot
//! when there is nothing to apply).

use ngfw_protocol::ConfigSection;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ConfigDiff, SubsystemAdapter, ValidationIssue};

#[derive(Default)]
pub struct SystemAdapter;

impl SystemAdapter {
    pub fn new() -> Self {
        Self
    }

    async fn read_cpu(&self) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let stat = tokio::fs::read_to_string("/proc/stat").await?;

        for line in stat.lines() {
            if let Some(rest) = line.strip_prefix("cpu ") {
                let fields: Vec<u64> = rest.split_whitespace().filter_map(|f| f.parse().ok()).collect();
                if fields.len() >= 4 {
                    let (user, nice, system, idle) = (fields[0], fields[1], fields[2], fields[3]);
                    let total = user + nice + system + idle;
                    let usage = if total > 0 { (total - idle) as f64 / total as f64 * 100.0 } else { 0.0 };
                    return Ok(json!({
                        "user": user, "nice": nice, "system": system, "idle": idle,
                        "usage_percent": (usage * 100.0).round() / 100.0,
                    }));
                }
                break;
            }
        }
        Ok(json!({}))
    }

    async fn read_memory(&self) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let meminfo = tokio::fs::read_to_string("/proc/meminfo").await?;
        let mut mem = serde_json::Map::new();

        for line in meminfo.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                let key = parts[0].trim_end_matches(':');
                if let Ok(val) = parts[1].parse::<u64>() {
                    if matches!(
                        key,
                        "MemTotal" | "MemFree" | "MemAvailable" | "Buffers" | "Cached" | "SwapTotal" | "SwapFree"
                    ) {
                        mem.insert(key.to_string(), json!(val));
                    }
                }
            }
        }

        if let (Some(total), Some(available)) = (
            mem.get("MemTotal").and_then(Value::as_u64),
            mem.get("MemAvailable").and_then(Value::as_u64),
        ) {
            if total > 0 {
                let pct = (total - available) as f64 / total as f64 * 100.0;
                mem.insert("usage_percent".to_string(), json!((pct * 100.0).round() / 100.0));
            }
        }

        Ok(Value::Object(mem))
    }

    async fn read_temperature(&self) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let mut temps = Vec::new();
        let mut idx = 0u32;

        loop {
            let path = format!("/sys/class/thermal/thermal_zone{idx}/temp");
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => {
                    if let Ok(millideg) = raw.trim().parse::<i64>() {
                        let celsius = millideg as f64 / 1000.0;
                        temps.push(json!({ "zone": idx, "celsius": (celsius * 10.0).round() / 10.0 }));
                    }
                    idx += 1;
                }
                Err(_) => break,
            }
        }

        if temps.is_empty() {
            debug!("no thermal zones found in sysfs");
        }
        Ok(json!(temps))
    }

    async fn read_interface_stats(&self) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let mut ifaces = serde_json::Map::new();

        let mut entries = tokio::fs::read_dir("/sys/class/net").await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "lo" {
                continue;
            }

            let base = format!("/sys/class/net/{name}/statistics");
            ifaces.insert(
                name,
                json!({
                    "rx_bytes": Self::read_stat_file(&format!("{base}/rx_bytes")).await,
                    "tx_bytes": Self::read_stat_file(&format!("{base}/tx_bytes")).await,
                    "rx_packets": Self::read_stat_file(&format!("{base}/rx_packets")).await,
                    "tx_packets": Self::read_stat_file(&format!("{base}/tx_packets")).await,
                }),
            );
        }

        Ok(Value::Object(ifaces))
    }

    async fn read_stat_file(path: &str) -> u64 {
        tokio::fs::read_to_string(path).await.ok().and_then(|s| s.trim().parse().ok()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl SubsystemAdapter for SystemAdapter {
    fn section(&self) -> ConfigSection {
        ConfigSection::System
    }

    async fn read_config(&self) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let hostname = tokio::fs::read_to_string("/proc/sys/kernel/hostname")
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        Ok(json!({ "hostname": hostname }))
    }

    async fn validate(
        &self,
        _config: &Value,
    ) -> Result<Vec<ValidationIssue>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(vec![ValidationIssue::error(
            "*",
            "system adapter is read-only; configuration changes are not supported",
        )])
    }

    async fn diff(
        &self,
        _proposed: &Value,
    ) -> Result<ConfigDiff, Box<dyn std::error::Error + Send + Sync>> {
        Ok(ConfigDiff::empty(ConfigSection::System))
    }

    async fn apply(
        &self,
        _config: &Value,
        _version: u64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("system adapter is read-only; configuration cannot be applied".into())
    }

    async fn rollback(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("system adapter is read-only; rollback is not supported".into())
    }

    async fn collect_metrics(&self) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let cpu = self.read_cpu().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to read CPU stats");
            json!(null)
        });
        let memory = self.read_memory().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to read memory stats");
            json!(null)
        });
        let temperature = self.read_temperature().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to read temperature");
            json!(null)
        });
        let interfaces = self.read_interface_stats().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to read interface stats");
            json!(null)
        });

        Ok(json!({ "cpu": cpu, "memory": memory, "temperature": temperature, "interfaces": interfaces }))
    }
}
