//! Metrics collection loop.
//!
//! Polls every registered adapter's `collect_metrics()` on a fixed interval
//! and ships the aggregate as one `METRICS` envelope. Per-adapter polling is
//! capped by its own timeout so one wedged subsystem can't stall the whole
//! round; the collector does not interpret what an adapter returns, only
//! where it goes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ngfw_protocol::{ConfigSection, MessageType, MetricsPayload, RpcMessage};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

use crate::adapters::SubsystemAdapter;
use crate::connection::ConnectionState;
use crate::ControlEvent;

const PER_ADAPTER_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll every adapter in `adapters` once per `interval` and send a `METRICS`
/// envelope on `outbound_tx`, as long as the connection is `Connected` at
/// send time. Stops when `control` carries `ControlEvent::Shutdown`.
pub async fn metrics_loop(
    adapters: Arc<HashMap<ConfigSection, Box<dyn SubsystemAdapter>>>,
    interval: Duration,
    outbound_tx: mpsc::Sender<RpcMessage>,
    state_rx: watch::Receiver<ConnectionState>,
    mut control: broadcast::Receiver<ControlEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            ev = control.recv() => {
                match ev {
                    Ok(ControlEvent::Shutdown) => break,
                    Ok(ControlEvent::ModeChanged(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        warn!("collector control channel lagged, some events were missed");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = ticker.tick() => {
                if *state_rx.borrow() != ConnectionState::Connected {
                    debug!("not connected, skipping metrics round");
                    continue;
                }

                let sections = collect_round(&adapters).await;
                let payload = MetricsPayload { timestamp: unix_now(), sections };
                let serialized = serde_json::to_value(&payload).expect("MetricsPayload always serializes");
                let msg = RpcMessage::new(MessageType::Metrics, serialized);

                // Telemetry is droppable: a full outbound queue means the
                // transport is backed up, and metrics are the one thing
                // that's fine to lose a round of.
                if outbound_tx.try_send(msg).is_err() {
                    warn!("outbound channel full, dropped a metrics round");
                }
            }
        }
    }
}

async fn collect_round(
    adapters: &HashMap<ConfigSection, Box<dyn SubsystemAdapter>>,
) -> HashMap<ConfigSection, serde_json::Value> {
    let mut sections = HashMap::with_capacity(adapters.len());

    for (section, adapter) in adapters.iter() {
        match tokio::time::timeout(PER_ADAPTER_TIMEOUT, adapter.collect_metrics()).await {
            Ok(Ok(value)) => {
                sections.insert(*section, value);
            }
            Ok(Err(err)) => {
                warn!(section = ?section, error = %err, "adapter metrics collection failed");
            }
            Err(_elapsed) => {
                warn!(section = ?section, "adapter metrics collection timed out");
            }
        }
    }

    sections
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
