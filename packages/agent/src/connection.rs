//! WebSocket transport: auth handshake, reconnection with jittered backoff,
//! and the 90-second dead-link keepalive timeout.
//!
//! The agent never originates its own keepalive ping — it only replies to
//! the peer's application-level `PING` (via the dispatcher, which owns the
//! full handler table) and to the transport's own WebSocket ping frames
//! (handled right here, since that's a protocol-level concern, not a
//! routed message). A connection that goes 90 seconds without receiving
//! any frame at all is treated as dead and torn down for reconnection.

use futures_util::{SinkExt, StreamExt};
use ngfw_protocol::{AuthRequest, MessageType, RpcMessage, StatusPayload};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;

use crate::config::AgentConfig;
use crate::error::{AuthError, TransportError};
use crate::ControlEvent;

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(90);

/// Published by the connection loop so other subsystems (the collector, in
/// particular) can tell whether a sample taken right now would actually
/// reach the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Dialing,
    Authenticating,
    Connected,
    Closing,
}

/// How the connection loop ended. `PermanentAuthFailure` propagates up to
/// `main`, which exits with code 3 rather than retrying forever against
/// credentials the peer has already rejected for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Stopped,
    PermanentAuthFailure,
}

enum ConnectError {
    Transport(TransportError),
    Auth(AuthError),
}

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

/// Connect, authenticate, and route frames until shutdown or a permanent
/// auth rejection. Reconnects with exponential backoff plus jitter on any
/// other failure; the attempt counter and backoff both reset after a clean
/// auth success.
pub async fn connection_loop(
    config: AgentConfig,
    mut outbound_rx: mpsc::Receiver<RpcMessage>,
    inbound_tx: mpsc::Sender<RpcMessage>,
    state_tx: watch::Sender<ConnectionState>,
    mut control: broadcast::Receiver<ControlEvent>,
) -> ConnectionOutcome {
    let mut backoff = BASE_BACKOFF;
    let mut attempt: u64 = 0;

    let span = info_span!("connection", device_id = %config.agent.device_id);

    async {
        loop {
            attempt += 1;
            let _ = state_tx.send(ConnectionState::Dialing);
            info!(attempt, url = %config.agent.websocket_url, "dialing");

            match connect_and_run(&config, &mut outbound_rx, &inbound_tx, &state_tx, &mut control).await {
                Ok(()) => {
                    info!("connection closed cleanly");
                    backoff = BASE_BACKOFF;
                    attempt = 0;
                }
                Err(ConnectError::Auth(err)) if err.permanent => {
                    warn!(reason = %err.reason, "auth rejected permanently, will not retry");
                    let _ = state_tx.send(ConnectionState::Closing);
                    let _ = state_tx.send(ConnectionState::Disconnected);
                    return ConnectionOutcome::PermanentAuthFailure;
                }
                Err(ConnectError::Auth(err)) => {
                    warn!(reason = %err.reason, "auth rejected, retrying");
                    let _ = state_tx.send(ConnectionState::Closing);
                }
                Err(ConnectError::Transport(err)) => {
                    warn!(error = %err, "transport error, retrying");
                    let _ = state_tx.send(ConnectionState::Closing);
                }
            }

            let _ = state_tx.send(ConnectionState::Disconnected);

            if matches!(control.try_recv(), Ok(ControlEvent::Shutdown)) {
                return ConnectionOutcome::Stopped;
            }

            let jitter = rand::thread_rng().gen_range(0.5..1.5);
            let delay = backoff.mul_f64(jitter);
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");

            tokio::select! {
                _ = sleep(delay) => {}
                ev = control.recv() => {
                    if matches!(ev, Ok(ControlEvent::Shutdown)) {
                        return ConnectionOutcome::Stopped;
                    }
                }
            }

            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
    .instrument(span)
    .await
}

async fn connect_and_run(
    config: &AgentConfig,
    outbound_rx: &mut mpsc::Receiver<RpcMessage>,
    inbound_tx: &mpsc::Sender<RpcMessage>,
    state_tx: &watch::Sender<ConnectionState>,
    control: &mut broadcast::Receiver<ControlEvent>,
) -> Result<(), ConnectError> {
    let _ = Url::parse(&config.agent.websocket_url)
        .map_err(|e| TransportError::FramingError(format!("invalid websocket url: {e}")))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(&config.agent.websocket_url)
        .await
        .map_err(|e| TransportError::DialFailed { url: config.agent.websocket_url.clone(), source: e })?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let _ = state_tx.send(ConnectionState::Authenticating);
    info!("websocket connected, authenticating");

    let auth_msg = RpcMessage::new(
        MessageType::Auth,
        serde_json::to_value(AuthRequest {
            device_id: config.agent.device_id.clone(),
            api_key: config.agent.api_key.clone(),
            firmware_version: read_firmware_version().await,
            agent_version: agent_version(),
        })
        .expect("AuthRequest always serializes"),
    );
    send_frame(&mut ws_tx, &auth_msg).await?;

    await_auth_result(&mut ws_rx).await?;
    debug!(device_id = %config.agent.device_id, "authenticated");

    let _ = state_tx.send(ConnectionState::Connected);

    send_initial_status(&mut ws_tx).await?;
    info!("entering message loop");

    loop {
        tokio::select! {
            incoming = timeout(KEEPALIVE_TIMEOUT, ws_rx.next()) => {
                match incoming {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        match serde_json::from_str::<RpcMessage>(&text) {
                            Ok(rpc) => {
                                if inbound_tx.send(rpc).await.is_err() {
                                    warn!("dispatcher channel closed");
                                    return Ok(());
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "dropping malformed envelope, connection kept open");
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Ping(data)))) => {
                        ws_tx.send(Message::Pong(data)).await.map_err(TransportError::WriteFailed)?;
                    }
                    Ok(Some(Ok(Message::Close(_)))) => {
                        info!("peer closed connection");
                        return Ok(());
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(err))) => return Err(TransportError::ReadFailed(err).into()),
                    Ok(None) => return Ok(()),
                    Err(_elapsed) => {
                        return Err(TransportError::KeepaliveTimeout { secs: KEEPALIVE_TIMEOUT.as_secs() }.into());
                    }
                }
            }

            msg = outbound_rx.recv() => {
                match msg {
                    Some(rpc) => send_frame(&mut ws_tx, &rpc).await?,
                    None => {
                        info!("outbound channel closed");
                        return Ok(());
                    }
                }
            }

            ev = control.recv() => {
                match ev {
                    Ok(ControlEvent::Shutdown) => {
                        let _ = state_tx.send(ConnectionState::Closing);
                        info!("shutdown requested, closing websocket");
                        let _ = ws_tx.close().await;
                        return Ok(());
                    }
                    Ok(ControlEvent::ModeChanged(_)) => {}
                    Err(_lagged_or_closed) => {}
                }
            }
        }
    }
}

async fn send_frame(
    ws_tx: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >,
    msg: &RpcMessage,
) -> Result<(), ConnectError> {
    let json = serde_json::to_string(msg).expect("RpcMessage always serializes");
    ws_tx.send(Message::Text(json.into())).await.map_err(|e| TransportError::WriteFailed(e).into())
}

async fn await_auth_result(
    ws_rx: &mut futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    >,
) -> Result<(), ConnectError> {
    let result = timeout(AUTH_TIMEOUT, async {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let Ok(rpc) = serde_json::from_str::<RpcMessage>(&text) else { continue };
                    match rpc.msg_type {
                        MessageType::AuthOk => return Ok(()),
                        MessageType::AuthFail => {
                            let reason = rpc.payload.get("reason").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
                            let permanent = rpc.payload.get("permanent").and_then(|v| v.as_bool()).unwrap_or(false);
                            return Err(AuthError { reason, permanent });
                        }
                        other => debug!(?other, "ignoring pre-auth message"),
                    }
                }
                Ok(Message::Close(_)) => {
                    return Err(AuthError { reason: "connection closed during auth".to_string(), permanent: false });
                }
                Err(_) => {
                    return Err(AuthError { reason: "transport error during auth".to_string(), permanent: false });
                }
                _ => {}
            }
        }
        Err(AuthError { reason: "connection closed before auth response".to_string(), permanent: false })
    })
    .await;

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(auth_err)) => Err(ConnectError::Auth(auth_err)),
        Err(_elapsed) => Err(ConnectError::Auth(AuthError { reason: "auth handshake timed out".to_string(), permanent: false })),
    }
}

async fn send_initial_status(
    ws_tx: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >,
) -> Result<(), ConnectError> {
    let status = StatusPayload {
        uptime: read_uptime().await,
        cpu: 0.0,
        memory: read_memory_percent().await,
        temperature: read_temperature().await,
        load: read_loadavg().await,
        interfaces: vec![],
        connections: read_connection_count().await,
        wan_ip: None,
        firmware: read_firmware_version().await,
    };
    let msg = RpcMessage::new(MessageType::Status, serde_json::to_value(status).expect("StatusPayload always serializes"));
    send_frame(ws_tx, &msg).await
}

// ---------------------------------------------------------------------------
// Host metric helpers for the initial STATUS send.
// ---------------------------------------------------------------------------

async fn read_uptime() -> u64 {
    tokio::fs::read_to_string("/proc/uptime")
        .await
        .ok()
        .and_then(|c| c.split_whitespace().next().and_then(|s| s.parse::<f64>().ok()))
        .map(|f| f as u64)
        .unwrap_or(0)
}

async fn read_memory_percent() -> f32 {
    let Ok(data) = tokio::fs::read_to_string("/proc/meminfo").await else { return 0.0 };
    let mut total: Option<u64> = None;
    let mut available: Option<u64> = None;

    for line in data.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = rest.split_whitespace().next().and_then(|s| s.parse().ok());
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = rest.split_whitespace().next().and_then(|s| s.parse().ok());
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }

    match (total, available) {
        (Some(t), Some(a)) if t > 0 => (t.saturating_sub(a) as f64 / t as f64 * 100.0) as f32,
        _ => 0.0,
    }
}

async fn read_loadavg() -> [f32; 3] {
    match tokio::fs::read_to_string("/proc/loadavg").await {
        Ok(contents) => {
            let parts: Vec<f32> = contents.split_whitespace().take(3).filter_map(|s| s.parse().ok()).collect();
            if parts.len() == 3 { [parts[0], parts[1], parts[2]] } else { [0.0, 0.0, 0.0] }
        }
        Err(_) => [0.0, 0.0, 0.0],
    }
}

async fn read_temperature() -> Option<f32> {
    tokio::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp")
        .await
        .ok()
        .and_then(|c| c.trim().parse::<f32>().ok())
        .map(|t| t / 1000.0)
}

async fn read_connection_count() -> u32 {
    match tokio::fs::read_to_string("/proc/net/tcp").await {
        Ok(contents) => contents.lines().count().saturating_sub(1) as u32,
        Err(_) => 0,
    }
}

/// The version string this agent reports in `AUTH`: the crate version plus
/// the short git hash it was built from, so the peer can tell two builds
/// of the same release apart.
pub fn agent_version() -> String {
    format!("{}+{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"))
}

/// Read the router firmware version from NVRAM (asuswrt-merlin-class
/// devices), falling back to the agent's own crate version in dev
/// environments without NVRAM.
async fn read_firmware_version() -> String {
    if let Ok(output) = tokio::process::Command::new("nvram").args(["get", "firmver"]).output().await {
        if output.status.success() {
            let ver = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !ver.is_empty() {
                if let Ok(build_output) = tokio::process::Command::new("nvram").args(["get", "buildno"]).output().await {
                    if build_output.status.success() {
                        let build = String::from_utf8_lossy(&build_output.stdout).trim().to_string();
                        if !build.is_empty() {
                            return format!("{ver}.{build}");
                        }
                    }
                }
                return ver;
            }
        }
    }
    env!("CARGO_PKG_VERSION").to_string()
}
