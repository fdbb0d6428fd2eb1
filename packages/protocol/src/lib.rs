//! NGFW.sh Protocol — shared RPC types for agent-to-control-plane
//! communication.
//!
//! This crate provides the canonical definitions for every message
//! exchanged over the agent's WebSocket channel. It intentionally carries
//! no cloud-side (REST/dashboard/fleet-registry) models: those live only on
//! the control plane and are never compiled into the on-device agent.

pub mod agent;
pub mod rpc;

pub use agent::*;
pub use rpc::*;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    #[test]
    fn rpc_message_roundtrip() {
        let msg = RpcMessage::with_id(
            "test-id-001".to_string(),
            MessageType::StatusOk,
            json!({"device_id": "dev-42"}),
        );

        let serialized = serde_json::to_string(&msg).unwrap();
        let deserialized: RpcMessage = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.id, "test-id-001");
        assert_eq!(deserialized.msg_type, MessageType::StatusOk);
        assert_eq!(deserialized.payload, json!({"device_id": "dev-42"}));
    }

    #[test]
    fn rpc_message_type_field_renamed_to_type() {
        let msg = RpcMessage::with_id("id-1".to_string(), MessageType::Ping, Value::Null);
        let v: Value = serde_json::to_value(&msg).unwrap();
        assert!(v.get("type").is_some(), "field should be serialized as 'type'");
        assert!(v.get("msg_type").is_none(), "field should NOT appear as 'msg_type'");
    }

    #[test]
    fn message_type_serde_screaming_snake_case() {
        let cases: Vec<(MessageType, &str)> = vec![
            (MessageType::Auth, "\"AUTH\""),
            (MessageType::AuthOk, "\"AUTH_OK\""),
            (MessageType::AuthFail, "\"AUTH_FAIL\""),
            (MessageType::Status, "\"STATUS\""),
            (MessageType::StatusOk, "\"STATUS_OK\""),
            (MessageType::Metrics, "\"METRICS\""),
            (MessageType::ConfigPush, "\"CONFIG_PUSH\""),
            (MessageType::ConfigAck, "\"CONFIG_ACK\""),
            (MessageType::Exec, "\"EXEC\""),
            (MessageType::ExecResult, "\"EXEC_RESULT\""),
            (MessageType::ModeUpdate, "\"MODE_UPDATE\""),
            (MessageType::ModeAck, "\"MODE_ACK\""),
            (MessageType::Ping, "\"PING\""),
            (MessageType::Pong, "\"PONG\""),
            (MessageType::Log, "\"LOG\""),
            (MessageType::Alert, "\"ALERT\""),
        ];

        for (variant, expected_json) in &cases {
            let serialized = serde_json::to_string(variant).unwrap();
            assert_eq!(
                &serialized, expected_json,
                "MessageType::{variant:?} serialized to {serialized}, expected {expected_json}"
            );
            let deserialized: MessageType = serde_json::from_str(expected_json).unwrap();
            assert_eq!(&deserialized, variant);
        }
    }

    #[test]
    fn config_section_serde_lowercase_and_complete() {
        let cases: Vec<(ConfigSection, &str)> = vec![
            (ConfigSection::System, "\"system\""),
            (ConfigSection::Firewall, "\"firewall\""),
            (ConfigSection::Dns, "\"dns\""),
            (ConfigSection::Wifi, "\"wifi\""),
            (ConfigSection::Vpn, "\"vpn\""),
            (ConfigSection::Routing, "\"routing\""),
            (ConfigSection::Wan, "\"wan\""),
            (ConfigSection::Lan, "\"lan\""),
        ];
        assert_eq!(cases.len(), ConfigSection::ALL.len());

        for (variant, expected_json) in &cases {
            let serialized = serde_json::to_string(variant).unwrap();
            assert_eq!(&serialized, expected_json);
            let deserialized: ConfigSection = serde_json::from_str(expected_json).unwrap();
            assert_eq!(&deserialized, variant);
        }
    }

    #[test]
    fn agent_mode_serde_lowercase() {
        let cases: Vec<(AgentMode, &str)> = vec![
            (AgentMode::Observe, "\"observe\""),
            (AgentMode::Shadow, "\"shadow\""),
            (AgentMode::Takeover, "\"takeover\""),
        ];

        for (variant, expected_json) in &cases {
            let serialized = serde_json::to_string(variant).unwrap();
            assert_eq!(&serialized, expected_json);
            let deserialized: AgentMode = serde_json::from_str(expected_json).unwrap();
            assert_eq!(&deserialized, variant);
        }
    }

    #[test]
    fn agent_mode_total_order() {
        assert!(AgentMode::Observe < AgentMode::Shadow);
        assert!(AgentMode::Shadow < AgentMode::Takeover);
        assert!(AgentMode::Observe < AgentMode::Takeover);
    }

    #[test]
    fn mode_config_effective_uses_override() {
        let mut overrides = HashMap::new();
        overrides.insert(ConfigSection::Firewall, AgentMode::Takeover);
        overrides.insert(ConfigSection::Wifi, AgentMode::Shadow);

        let cfg = ModeConfig {
            default: AgentMode::Observe,
            overrides,
        };

        assert_eq!(cfg.effective(ConfigSection::Firewall), AgentMode::Takeover);
        assert_eq!(cfg.effective(ConfigSection::Wifi), AgentMode::Shadow);
        assert_eq!(cfg.effective(ConfigSection::Dns), AgentMode::Observe);
        assert_eq!(cfg.effective(ConfigSection::Lan), AgentMode::Observe);
    }

    #[test]
    fn mode_config_default_is_observe_with_empty_overrides() {
        let cfg = ModeConfig::default();
        assert_eq!(cfg.default, AgentMode::Observe);
        assert!(cfg.overrides.is_empty());
    }

    #[test]
    fn agent_mode_default_is_observe() {
        assert_eq!(AgentMode::default(), AgentMode::Observe);
    }

    #[test]
    fn config_push_roundtrip() {
        let push = ConfigPush {
            section: ConfigSection::Firewall,
            config: json!({
                "default_policy": "deny",
                "rules": [
                    {"action": "allow", "port": 443, "proto": "tcp"}
                ]
            }),
            version: 17,
        };

        let serialized = serde_json::to_string(&push).unwrap();
        let deserialized: ConfigPush = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.section, ConfigSection::Firewall);
        assert_eq!(deserialized.version, 17);
        assert_eq!(deserialized.config["default_policy"], json!("deny"));
        assert_eq!(deserialized.config["rules"][0]["port"], json!(443));
    }

    #[test]
    fn config_push_section_serialized_lowercase() {
        let push = ConfigPush {
            section: ConfigSection::Wan,
            config: json!({}),
            version: 1,
        };
        let v: Value = serde_json::to_value(&push).unwrap();
        assert_eq!(v["section"], json!("wan"));
    }

    #[test]
    fn config_ack_outcome_snake_case() {
        let cases: Vec<(ConfigOutcome, &str)> = vec![
            (ConfigOutcome::UnknownSection, "\"unknown_section\""),
            (ConfigOutcome::AcknowledgedOnly, "\"acknowledged_only\""),
            (ConfigOutcome::Validated, "\"validated\""),
            (ConfigOutcome::Rejected, "\"rejected\""),
            (ConfigOutcome::Applied, "\"applied\""),
            (ConfigOutcome::ApplyFailed, "\"apply_failed\""),
        ];
        for (variant, expected_json) in &cases {
            let serialized = serde_json::to_string(variant).unwrap();
            assert_eq!(&serialized, expected_json);
            let deserialized: ConfigOutcome = serde_json::from_str(expected_json).unwrap();
            assert_eq!(&deserialized, variant);
        }
    }

    #[test]
    fn config_ack_omits_empty_issues_and_none_fields() {
        let ack = ConfigAck {
            section: ConfigSection::Dns,
            version: 3,
            outcome: ConfigOutcome::AcknowledgedOnly,
            issues: vec![],
            diff: None,
            error: None,
            rolled_back: None,
        };
        let v: Value = serde_json::to_value(&ack).unwrap();
        assert!(v.get("issues").is_none());
        assert!(v.get("diff").is_none());
        assert!(v.get("error").is_none());
        assert!(v.get("rolled_back").is_none());
    }

    #[test]
    fn metrics_payload_roundtrip() {
        let mut sections = HashMap::new();
        sections.insert(ConfigSection::System, json!({"cpu": 12.5, "memory": 40.1}));
        sections.insert(ConfigSection::Wan, json!({"rx_rate": 1000, "tx_rate": 200}));

        let payload = MetricsPayload {
            timestamp: 1_700_000_000,
            sections,
        };

        let serialized = serde_json::to_string(&payload).unwrap();
        let deserialized: MetricsPayload = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.timestamp, 1_700_000_000);
        assert_eq!(deserialized.sections.len(), 2);
        assert_eq!(deserialized.sections[&ConfigSection::System]["cpu"], json!(12.5));
    }

    #[test]
    fn alert_type_serde_snake_case() {
        let cases: Vec<(AlertType, &str)> = vec![
            (AlertType::IntrusionAttempt, "\"intrusion_attempt\""),
            (AlertType::BruteForce, "\"brute_force\""),
            (AlertType::PortScan, "\"port_scan\""),
            (AlertType::PolicyViolation, "\"policy_violation\""),
            (AlertType::ConfigChange, "\"config_change\""),
            (AlertType::SystemAnomaly, "\"system_anomaly\""),
            (AlertType::RollbackPending, "\"rollback_pending\""),
        ];

        for (variant, expected_json) in &cases {
            let serialized = serde_json::to_string(variant).unwrap();
            assert_eq!(&serialized, expected_json);
            let deserialized: AlertType = serde_json::from_str(expected_json).unwrap();
            assert_eq!(&deserialized, variant);
        }
    }

    #[test]
    fn exec_command_optional_fields_none() {
        let json_str = r#"{"argv": ["uname", "-a"]}"#;
        let cmd: ExecCommand = serde_json::from_str(json_str).unwrap();
        assert_eq!(cmd.argv, vec!["uname".to_string(), "-a".to_string()]);
        assert!(cmd.stdin.is_none());
        assert!(cmd.timeout_ms.is_none());
    }

    #[test]
    fn exec_command_optional_fields_present() {
        let json_str = r#"{"argv": ["iptables", "-L", "-n"], "timeout_ms": 5000}"#;
        let cmd: ExecCommand = serde_json::from_str(json_str).unwrap();
        assert_eq!(cmd.argv.len(), 3);
        assert_eq!(cmd.timeout_ms, Some(5000));
    }

    #[test]
    fn exec_result_default_flags_omitted() {
        let result = ExecResult {
            exit: 0,
            stdout: "ok".to_string(),
            stderr: String::new(),
            duration_ms: 12,
            timed_out: false,
            truncated: false,
        };
        let v: Value = serde_json::to_value(&result).unwrap();
        assert!(v.get("stderr").is_none(), "empty stderr should be omitted");
        assert!(v.get("timed_out").is_none());
        assert!(v.get("truncated").is_none());
    }

    #[test]
    fn rpc_message_with_config_push_payload() {
        let push = ConfigPush {
            section: ConfigSection::Dns,
            config: json!({"upstream": ["1.1.1.1", "8.8.8.8"]}),
            version: 5,
        };
        let msg = RpcMessage::with_id(
            "msg-42".to_string(),
            MessageType::ConfigPush,
            serde_json::to_value(&push).unwrap(),
        );

        let serialized = serde_json::to_string(&msg).unwrap();
        let deserialized: RpcMessage = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.msg_type, MessageType::ConfigPush);
        let inner: ConfigPush = serde_json::from_value(deserialized.payload).unwrap();
        assert_eq!(inner.section, ConfigSection::Dns);
        assert_eq!(inner.version, 5);
    }

    #[test]
    fn rpc_message_with_alert_payload() {
        let alert = AlertMessage {
            timestamp: 1_700_000_000,
            severity: AlertSeverity::High,
            alert_type: AlertType::IntrusionAttempt,
            source: "192.168.1.100".to_string(),
            description: "SSH brute force detected".to_string(),
            details: Some(json!({"attempts": 50})),
        };
        let msg = RpcMessage::with_id(
            "msg-alert-1".to_string(),
            MessageType::Alert,
            serde_json::to_value(&alert).unwrap(),
        );

        let serialized = serde_json::to_string(&msg).unwrap();
        let deserialized: RpcMessage = serde_json::from_str(&serialized).unwrap();
        let inner: AlertMessage = serde_json::from_value(deserialized.payload).unwrap();
        assert_eq!(inner.alert_type, AlertType::IntrusionAttempt);
        assert_eq!(inner.severity, AlertSeverity::High);
    }

    #[test]
    fn mode_config_roundtrip_with_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert(ConfigSection::Firewall, AgentMode::Takeover);
        overrides.insert(ConfigSection::Dns, AgentMode::Shadow);

        let cfg = ModeConfig {
            default: AgentMode::Observe,
            overrides,
        };

        let serialized = serde_json::to_string(&cfg).unwrap();
        let deserialized: ModeConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.default, AgentMode::Observe);
        assert_eq!(deserialized.overrides.len(), 2);
        assert_eq!(deserialized.effective(ConfigSection::Firewall), AgentMode::Takeover);
        assert_eq!(deserialized.effective(ConfigSection::Dns), AgentMode::Shadow);
        assert_eq!(deserialized.effective(ConfigSection::Wan), AgentMode::Observe);
    }

    #[test]
    fn mode_config_overrides_defaults_to_empty() {
        let json_str = r#"{"default": "observe"}"#;
        let cfg: ModeConfig = serde_json::from_str(json_str).unwrap();
        assert_eq!(cfg.default, AgentMode::Observe);
        assert!(cfg.overrides.is_empty());
    }

    #[test]
    fn log_level_serde_lowercase() {
        let cases: Vec<(LogLevel, &str)> = vec![
            (LogLevel::Debug, "\"debug\""),
            (LogLevel::Info, "\"info\""),
            (LogLevel::Warn, "\"warn\""),
            (LogLevel::Error, "\"error\""),
        ];
        for (variant, expected_json) in &cases {
            let serialized = serde_json::to_string(variant).unwrap();
            assert_eq!(&serialized, expected_json);
            let deserialized: LogLevel = serde_json::from_str(expected_json).unwrap();
            assert_eq!(&deserialized, variant);
        }
    }

    #[test]
    fn alert_severity_serde_lowercase() {
        let cases: Vec<(AlertSeverity, &str)> = vec![
            (AlertSeverity::Low, "\"low\""),
            (AlertSeverity::Medium, "\"medium\""),
            (AlertSeverity::High, "\"high\""),
            (AlertSeverity::Critical, "\"critical\""),
        ];
        for (variant, expected_json) in &cases {
            let serialized = serde_json::to_string(variant).unwrap();
            assert_eq!(&serialized, expected_json);
            let deserialized: AlertSeverity = serde_json::from_str(expected_json).unwrap();
            assert_eq!(&deserialized, variant);
        }
    }

    #[test]
    fn auth_fail_permanent_defaults_to_false() {
        let json_str = r#"{"reason": "bad key"}"#;
        let fail: AuthFailPayload = serde_json::from_str(json_str).unwrap();
        assert!(!fail.permanent);
    }

    #[test]
    fn config_ack_carries_diff_when_present() {
        let ack = ConfigAck {
            section: ConfigSection::Firewall,
            version: 6,
            outcome: ConfigOutcome::Validated,
            issues: vec![],
            diff: Some(ConfigDiffWire {
                additions: vec!["rules[2]".to_string()],
                removals: vec![],
                changes: vec![FieldChange {
                    field: "default_policy".to_string(),
                    old: "allow".to_string(),
                    new: "deny".to_string(),
                }],
            }),
            error: None,
            rolled_back: None,
        };
        let serialized = serde_json::to_string(&ack).unwrap();
        let deserialized: ConfigAck = serde_json::from_str(&serialized).unwrap();
        let diff = deserialized.diff.expect("diff should round-trip");
        assert_eq!(diff.additions, vec!["rules[2]".to_string()]);
        assert_eq!(diff.changes[0].field, "default_policy");
    }

    #[test]
    fn auth_request_roundtrip() {
        let req = AuthRequest {
            device_id: "dev-1".to_string(),
            api_key: "key-1".to_string(),
            firmware_version: "1.0.0".to_string(),
            agent_version: "0.1.0".to_string(),
        };
        let serialized = serde_json::to_string(&req).unwrap();
        let deserialized: AuthRequest = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.device_id, "dev-1");
        assert_eq!(deserialized.agent_version, "0.1.0");
    }
}
