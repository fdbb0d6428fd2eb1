//! RPC message models for the router agent's control-plane channel.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// RPC message envelope. One per wire frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub payload: Value,
}

impl RpcMessage {
    /// Create a new RPC message with an auto-generated envelope id.
    #[cfg(feature = "native")]
    pub fn new(msg_type: MessageType, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            msg_type,
            payload,
        }
    }

    /// Create a new RPC message with a provided id, e.g. to echo a request's
    /// id back on its reply.
    pub fn with_id(id: String, msg_type: MessageType, payload: Value) -> Self {
        Self {
            id,
            msg_type,
            payload,
        }
    }
}

/// The complete, closed set of message kinds exchanged on the channel.
/// There is no catch-all variant: an unrecognized tag fails to deserialize
/// as a `MessageType` and the envelope is dropped at the framing layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    // Agent to peer
    Auth,
    Status,
    Metrics,
    ConfigAck,
    ExecResult,
    Log,
    Alert,
    Pong,
    ModeAck,

    // Peer to agent
    AuthOk,
    AuthFail,
    StatusOk,
    ConfigPush,
    Exec,
    ModeUpdate,
    Ping,
}

/// `AUTH` payload, sent once immediately after transport establishment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub device_id: String,
    pub api_key: String,
    pub firmware_version: String,
    pub agent_version: String,
}

/// `AUTH_OK` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthOkPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_time: Option<i64>,
}

/// `AUTH_FAIL` payload. A `permanent` rejection must not be retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFailPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub permanent: bool,
}

/// `STATUS` payload, sent once right after a successful auth handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub uptime: u64,
    pub cpu: f32,
    pub memory: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub load: [f32; 3],
    pub interfaces: Vec<InterfaceInfo>,
    pub connections: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wan_ip: Option<String>,
    pub firmware: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// `METRICS` payload. One envelope timestamp; per-section values are
/// whatever JSON each section's adapter returned from `collect_metrics`.
/// The collector does not interpret or reshape adapter output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsPayload {
    pub timestamp: i64,
    pub sections: HashMap<ConfigSection, Value>,
}

/// `CONFIG_PUSH` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigPush {
    pub section: ConfigSection,
    pub config: Value,
    pub version: u64,
}

/// The closed set of subsystems the agent can manage. Extending this set is
/// a breaking change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSection {
    System,
    Firewall,
    Dns,
    Wifi,
    Vpn,
    Routing,
    Wan,
    Lan,
}

impl ConfigSection {
    /// All sections, in the fixed order used for adapter registration and
    /// config-file `[adapters]` enumeration.
    pub const ALL: [ConfigSection; 8] = [
        ConfigSection::System,
        ConfigSection::Firewall,
        ConfigSection::Dns,
        ConfigSection::Wifi,
        ConfigSection::Vpn,
        ConfigSection::Routing,
        ConfigSection::Wan,
        ConfigSection::Lan,
    ];
}

/// Outcome of a `CONFIG_PUSH`, carried on the `CONFIG_ACK` reply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfigOutcome {
    /// No adapter is registered for the requested section.
    UnknownSection,
    /// Mode is `observe`; the push was acknowledged but nothing happened.
    AcknowledgedOnly,
    /// Mode is `shadow`; validated and diffed, nothing applied.
    Validated,
    /// Mode is `takeover`; validation found an error-severity issue.
    Rejected,
    /// Mode is `takeover`; applied successfully.
    Applied,
    /// Mode is `takeover`; apply failed. `rolled_back` reports recovery.
    ApplyFailed,
}

/// A single validation finding against a proposed config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssueWire {
    pub field: String,
    pub message: String,
    pub severity: IssueSeverity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// `CONFIG_ACK` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigAck {
    pub section: ConfigSection,
    pub version: u64,
    pub outcome: ConfigOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ValidationIssueWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<ConfigDiffWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolled_back: Option<bool>,
}

/// Wire form of an adapter's `diff()` result, attached to a `shadow`-mode
/// `CONFIG_ACK` so the peer can show what a `takeover` apply would change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDiffWire {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

/// `EXEC` payload. Correlated to its `EXEC_RESULT` reply by envelope id
/// alone — there is no separate command identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecCommand {
    pub argv: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// `EXEC_RESULT` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// `LOG` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    pub timestamp: i64,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// `ALERT` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertMessage {
    pub timestamp: i64,
    pub severity: AlertSeverity,
    pub alert_type: AlertType,
    pub source: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    IntrusionAttempt,
    BruteForce,
    PortScan,
    PolicyViolation,
    ConfigChange,
    SystemAnomaly,
    /// A rollback record was found `pending` at startup: the previous
    /// apply for that section never reached a terminal outcome.
    RollbackPending,
    /// An apply failed and the adapter's own `rollback()` also failed: the
    /// section is left in an inconsistent, hands-on-keyboard state.
    RollbackFailed,
}
