pub mod adapters;
pub mod collector;
pub mod config;
pub mod connection;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod mode;
pub mod rollback;

use ngfw_protocol::ModeConfig;

/// Broadcast over the agent's single control channel: mode changes and
/// shutdown are both "something every subsystem should react to
/// immediately", so they share one `tokio::sync::broadcast` rather than
/// two separate `watch` channels.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    ModeChanged(ModeConfig),
    Shutdown,
}
