//! Configuration loading from TOML, with environment-variable overrides.

use serde::Deserialize;

/// Environment variable that overrides `[agent].api_key`.
pub const API_KEY_ENV: &str = "NGFW_API_KEY";
/// Environment variable that overrides the `--config` path when no
/// explicit flag is given.
pub const CONFIG_PATH_ENV: &str = "NGFW_CONFIG";

/// Top-level agent configuration (loaded from `/jffs/ngfw/config.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub agent: AgentSection,
    #[serde(default)]
    pub mode: ModeSection,
    #[serde(default)]
    pub adapters: AdaptersSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    pub device_id: String,
    pub api_key: String,
    #[serde(default = "default_ws_url")]
    pub websocket_url: String,
    pub log_level: Option<String>,
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModeSection {
    #[serde(default = "default_mode")]
    pub default: String,
}

impl Default for ModeSection {
    fn default() -> Self {
        Self {
            default: default_mode(),
        }
    }
}

/// One enable flag per config section. Disabled adapters are not
/// registered at startup and behave as if no adapter exists for that
/// section (`CONFIG_ACK{outcome: unknown_section}`).
#[derive(Debug, Clone, Deserialize)]
pub struct AdaptersSection {
    #[serde(default = "default_true")]
    pub system: bool,
    #[serde(default = "default_true")]
    pub firewall: bool,
    #[serde(default = "default_true")]
    pub dns: bool,
    #[serde(default = "default_true")]
    pub wifi: bool,
    #[serde(default)]
    pub vpn: bool,
    #[serde(default)]
    pub routing: bool,
    #[serde(default = "default_true")]
    pub wan: bool,
    #[serde(default = "default_true")]
    pub lan: bool,
}

impl Default for AdaptersSection {
    fn default() -> Self {
        Self {
            system: true,
            firewall: true,
            dns: true,
            wifi: true,
            vpn: false,
            routing: false,
            wan: true,
            lan: true,
        }
    }
}

impl AdaptersSection {
    pub fn enabled(&self, section: ngfw_protocol::ConfigSection) -> bool {
        use ngfw_protocol::ConfigSection;
        match section {
            ConfigSection::System => self.system,
            ConfigSection::Firewall => self.firewall,
            ConfigSection::Dns => self.dns,
            ConfigSection::Wifi => self.wifi,
            ConfigSection::Vpn => self.vpn,
            ConfigSection::Routing => self.routing,
            ConfigSection::Wan => self.wan,
            ConfigSection::Lan => self.lan,
        }
    }
}

fn default_ws_url() -> String {
    "wss://api.ngfw.sh/ws".to_string()
}

fn default_metrics_interval() -> u64 {
    5
}

fn default_mode() -> String {
    "observe".to_string()
}

fn default_true() -> bool {
    true
}

/// Default base directory for persisted state: `mode.json`,
/// `rollback/<section>.bin`, `agent.pid`.
pub const DEFAULT_BASE_DIR: &str = "/jffs/ngfw";

impl AgentConfig {
    /// Load configuration from a TOML file, applying `NGFW_API_KEY` as an
    /// override of `[agent].api_key` if present.
    ///
    /// Synchronous and `std::fs`-based rather than `tokio::fs`-based on
    /// purpose: `--daemon` must fork before the Tokio runtime starts (forking
    /// a multi-threaded runtime is unsound), and config loading — along with
    /// `--check` — happens before that runtime exists.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: AgentConfig = toml::from_str(&contents)?;

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            config.agent.api_key = key;
        }

        Ok(config)
    }

    /// Resolve the effective config path: an explicit `--config` flag wins
    /// over `NGFW_CONFIG`, which exists only so a supervisor can set the
    /// path without touching argv.
    pub fn resolve_path(explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(|| "/jffs/ngfw/config.toml".to_string())
    }
}
