//! Mode persistence and the wait-free `ModeEngine` front for reading it.
//!
//! The mode file is the one piece of agent state that must survive a
//! crash mid-write without corrupting silently: writes go to a temp file
//! in the same directory and are renamed into place, and a file that
//! fails to parse is preserved under a `.corrupt.<unix timestamp>` name
//! rather than overwritten, so it can be inspected after the fact.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ngfw_protocol::{AgentMode, ConfigSection, ModeConfig};
use tokio::sync::{broadcast, watch};

use crate::ControlEvent;

const MODE_FILE_NAME: &str = "mode.json";

fn mode_file_path(base_dir: &Path) -> PathBuf {
    base_dir.join(MODE_FILE_NAME)
}

/// Load the persisted `ModeConfig`, defaulting to `AgentMode::Observe` with
/// no overrides if the file is absent. A file that exists but fails to
/// parse is moved aside rather than treated as "missing", so a future
/// investigation can see what was there.
pub async fn load_persisted_mode(base_dir: &Path) -> std::io::Result<ModeConfig> {
    let path = mode_file_path(base_dir);

    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ModeConfig::default());
        }
        Err(err) => return Err(err),
    };

    match serde_json::from_str(&contents) {
        Ok(mode_config) => Ok(mode_config),
        Err(parse_err) => {
            preserve_corrupt_file(&path).await?;
            tracing::warn!(
                error = %parse_err,
                "mode file failed to parse, preserved and reset to default"
            );
            Ok(ModeConfig::default())
        }
    }
}

async fn preserve_corrupt_file(path: &Path) -> std::io::Result<()> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let corrupt_path = path.with_extension(format!("json.corrupt.{timestamp}"));
    tokio::fs::rename(path, &corrupt_path).await
}

/// Persist `mode_config` atomically: write to a temp file in the same
/// directory, then rename over the real path. A rename within one
/// filesystem is atomic, so a crash mid-write never leaves a half-written
/// mode file behind.
pub async fn persist_mode(base_dir: &Path, mode_config: &ModeConfig) -> std::io::Result<()> {
    tokio::fs::create_dir_all(base_dir).await?;
    let path = mode_file_path(base_dir);
    let tmp_path = path.with_extension("json.tmp");

    let serialized = serde_json::to_string_pretty(mode_config)?;
    tokio::fs::write(&tmp_path, serialized).await?;
    tokio::fs::rename(&tmp_path, &path).await?;

    Ok(())
}

/// Persist the new mode and broadcast `ControlEvent::ModeChanged` so every
/// subsystem (dispatcher, collector, connection) picks it up without
/// polling.
pub async fn apply_and_broadcast(
    base_dir: &Path,
    mode_config: ModeConfig,
    events: &broadcast::Sender<ControlEvent>,
) -> std::io::Result<()> {
    persist_mode(base_dir, &mode_config).await?;
    let _ = events.send(ControlEvent::ModeChanged(mode_config));
    Ok(())
}

/// Wait-free-read front for the current mode.
///
/// Every apply goes through the already-tested [`apply_and_broadcast`], so
/// readers that only need "what's the mode right now" — the dispatcher's
/// per-message gating check, the collector's section filter — don't pay for
/// a broadcast subscription and a channel poll. `watch` gives them a clone
/// of the latest value with no lock contention against the writer.
pub struct ModeEngine {
    base_dir: PathBuf,
    events: broadcast::Sender<ControlEvent>,
    current: watch::Sender<ModeConfig>,
}

impl ModeEngine {
    pub fn new(base_dir: PathBuf, initial: ModeConfig, events: broadcast::Sender<ControlEvent>) -> Self {
        let (current, _) = watch::channel(initial);
        Self { base_dir, events, current }
    }

    /// Persist `mode_config`, broadcast the change, and update the watch
    /// cell that `current`/`effective`/`subscribe` read from.
    pub async fn apply(&self, mode_config: ModeConfig) -> std::io::Result<()> {
        apply_and_broadcast(&self.base_dir, mode_config.clone(), &self.events).await?;
        let _ = self.current.send(mode_config);
        Ok(())
    }

    /// The current `ModeConfig`, cloned out of the watch cell.
    pub fn current(&self) -> ModeConfig {
        self.current.borrow().clone()
    }

    /// The effective mode for one section, without cloning the whole config.
    pub fn effective(&self, section: ConfigSection) -> AgentMode {
        self.current.borrow().effective(section)
    }

    /// A `watch::Receiver` for tasks that want to react to every change
    /// rather than poll for the current value.
    pub fn subscribe(&self) -> watch::Receiver<ModeConfig> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_persisted_mode(dir.path()).await.unwrap();
        assert_eq!(loaded.default, AgentMode::Observe);
        assert!(loaded.overrides.is_empty());
    }

    #[tokio::test]
    async fn persist_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut overrides = HashMap::new();
        overrides.insert(ConfigSection::Firewall, AgentMode::Takeover);
        let mode_config = ModeConfig {
            default: AgentMode::Shadow,
            overrides,
        };

        persist_mode(dir.path(), &mode_config).await.unwrap();
        let loaded = load_persisted_mode(dir.path()).await.unwrap();

        assert_eq!(loaded.default, AgentMode::Shadow);
        assert_eq!(
            loaded.overrides.get(&ConfigSection::Firewall),
            Some(&AgentMode::Takeover)
        );
    }

    #[tokio::test]
    async fn persist_does_not_leave_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        persist_mode(dir.path(), &ModeConfig::default()).await.unwrap();
        assert!(!dir.path().join("mode.json.tmp").exists());
        assert!(dir.path().join("mode.json").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_preserved_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = mode_file_path(dir.path());
        tokio::fs::write(&path, "not json").await.unwrap();

        let loaded = load_persisted_mode(dir.path()).await.unwrap();
        assert_eq!(loaded, ModeConfig::default());

        assert!(!path.exists());
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut found_corrupt = false;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_name().to_string_lossy().contains("corrupt") {
                found_corrupt = true;
            }
        }
        assert!(found_corrupt, "expected a preserved .corrupt.<ts> file");
    }

    #[tokio::test]
    async fn apply_and_broadcast_sends_event() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = broadcast::channel(4);
        let mode_config = ModeConfig {
            default: AgentMode::Takeover,
            overrides: HashMap::new(),
        };

        apply_and_broadcast(dir.path(), mode_config.clone(), &tx)
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            ControlEvent::ModeChanged(received) => assert_eq!(received.default, AgentMode::Takeover),
            ControlEvent::Shutdown => panic!("expected ModeChanged"),
        }
    }

    #[tokio::test]
    async fn mode_engine_apply_updates_current_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = broadcast::channel(4);
        let engine = ModeEngine::new(dir.path().to_path_buf(), ModeConfig::default(), tx);
        assert_eq!(engine.current().default, AgentMode::Observe);

        let mut overrides = HashMap::new();
        overrides.insert(ConfigSection::Firewall, AgentMode::Takeover);
        let new_mode = ModeConfig { default: AgentMode::Shadow, overrides };
        engine.apply(new_mode.clone()).await.unwrap();

        assert_eq!(engine.current().default, AgentMode::Shadow);
        assert_eq!(engine.effective(ConfigSection::Firewall), AgentMode::Takeover);
        assert_eq!(engine.effective(ConfigSection::Dns), AgentMode::Shadow);

        match rx.try_recv().unwrap() {
            ControlEvent::ModeChanged(received) => assert_eq!(received.default, AgentMode::Shadow),
            ControlEvent::Shutdown => panic!("expected ModeChanged"),
        }

        let reloaded = load_persisted_mode(dir.path()).await.unwrap();
        assert_eq!(reloaded.default, AgentMode::Shadow);
    }

    #[tokio::test]
    async fn mode_engine_subscribe_observes_change() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = broadcast::channel(4);
        let engine = ModeEngine::new(dir.path().to_path_buf(), ModeConfig::default(), tx);
        let mut sub = engine.subscribe();

        let new_mode = ModeConfig { default: AgentMode::Takeover, overrides: HashMap::new() };
        engine.apply(new_mode).await.unwrap();

        sub.changed().await.unwrap();
        assert_eq!(sub.borrow().default, AgentMode::Takeover);
    }
}
