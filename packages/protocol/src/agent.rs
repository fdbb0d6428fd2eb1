//! Agent mode and mode-configuration types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::rpc::ConfigSection;

/// The agent's safety mode, in increasing order of permitted authority:
/// `Observe` ≺ `Shadow` ≺ `Takeover`. Declaration order is significant —
/// the derived `Ord` implementation is the total order the mode table uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Read-only: collect metrics, send logs/alerts, report config state.
    Observe,
    /// Validate and diff proposed configs without applying.
    Shadow,
    /// Full control: validate, apply, rollback configurations.
    Takeover,
}

impl Default for AgentMode {
    fn default() -> Self {
        Self::Observe
    }
}

/// Mode configuration: a default mode plus optional per-section overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub default: AgentMode,
    /// Per-section overrides, e.g. `firewall = takeover` while the rest of
    /// the device stays at `observe`.
    #[serde(default)]
    pub overrides: HashMap<ConfigSection, AgentMode>,
}

impl ModeConfig {
    /// The effective mode for a section: its override if present, else the
    /// default mode.
    pub fn effective(&self, section: ConfigSection) -> AgentMode {
        self.overrides.get(&section).copied().unwrap_or(self.default)
    }
}

/// Peer-to-agent: `MODE_UPDATE` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeUpdatePayload {
    pub mode_config: ModeConfig,
}

/// Agent-to-peer: `MODE_ACK` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeAckPayload {
    pub success: bool,
    pub mode_config: ModeConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
