//! Wires a database and a transport into a runner for one node.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cn_dbc::{Database, MessageCodec, Signal};
use cn_runner::{
    FrameReceiver, FrameTransmitter, Runner, RunnerError, SharedSignals, SignalSnapshot,
    SubscriptionId, shared,
};

use crate::config::NodeConfig;

/// A configured runner plus the value stores of its transmitted messages.
pub struct NodeRuntime {
    pub runner: Runner,
    /// Message id -> value store read by that message's transmit loop.
    pub signals: HashMap<u32, SharedSignals>,
    /// Logging subscription over every message the node receives.
    pub subscription: Option<SubscriptionId>,
}

impl NodeRuntime {
    /// Update one signal of a transmitted message by name.
    pub async fn set(&self, message: &str, signal: &str, value: f64) -> anyhow::Result<()> {
        let codec = self
            .runner
            .database()
            .message_by_name(message)
            .ok_or_else(|| anyhow::anyhow!("unknown message {message}"))?;
        let store = self
            .signals
            .get(&codec.id())
            .ok_or_else(|| anyhow::anyhow!("message {message} is not transmitted by this node"))?;
        store.write().await.set(signal, value);
        Ok(())
    }
}

/// Build a runner for `config.node`: schedule every message it transmits
/// and log every message it receives. Must be called from within a Tokio
/// runtime; the runner is returned unstarted.
pub fn build(
    config: &NodeConfig,
    db: Arc<Database>,
    transmitter: Arc<dyn FrameTransmitter>,
    receiver: Arc<dyn FrameReceiver>,
) -> anyhow::Result<NodeRuntime> {
    if !db.nodes().contains(&config.node.as_str()) {
        anyhow::bail!("node {} is not declared in the database", config.node);
    }

    let mut runner = Runner::new(
        Arc::clone(&db),
        config.node.clone(),
        transmitter,
        receiver,
        config.runner.clone(),
    );

    let mut signals = HashMap::new();
    for &id in db.transmitted_by(&config.node) {
        let Some(codec) = db.message(id) else {
            continue;
        };
        let store = shared(initial_snapshot(codec, config.signals.get(codec.name())));

        let scheduled = match config.periods.get(codec.name()) {
            Some(&ms) => {
                runner.schedule_with_period(id, Duration::from_millis(ms), store.clone())
            }
            None => runner.schedule(id, store.clone()),
        };
        match scheduled {
            Ok(()) => {
                tracing::info!(message_id = id, name = codec.name(), "message scheduled");
                signals.insert(id, store);
            }
            Err(RunnerError::NoPeriod(_)) => {
                tracing::warn!(
                    message_id = id,
                    name = codec.name(),
                    "message has no cycle time and no configured period, not scheduled"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    let received = db.received_by(&config.node).to_vec();
    let subscription = if received.is_empty() {
        None
    } else {
        Some(runner.dispatcher().subscribe(&received, |message, timestamp| {
            match serde_json::to_string(message) {
                Ok(json) => tracing::info!(
                    message_id = message.id,
                    name = %message.name,
                    timestamp = %timestamp,
                    decoded = %json,
                    "message received"
                ),
                Err(e) => tracing::warn!(error = %e, "failed to serialize decoded message"),
            }
        }))
    };

    Ok(NodeRuntime {
        runner,
        signals,
        subscription,
    })
}

/// Starting values for every signal of `codec`: configured value, else zero,
/// else the range minimum when zero is out of range.
pub fn initial_snapshot(codec: &MessageCodec, configured: Option<&HashMap<String, f64>>) -> SignalSnapshot {
    let mut snapshot = SignalSnapshot::new();
    for signal in codec.signals() {
        let value = configured
            .and_then(|values| values.get(&signal.name).copied())
            .unwrap_or_else(|| default_value(signal));
        snapshot.set(signal.name.clone(), value);
    }
    snapshot
}

fn default_value(signal: &Signal) -> f64 {
    let layout = &signal.layout;
    if layout.is_bounded() && !(layout.min..=layout.max).contains(&0.0) {
        layout.min
    } else {
        0.0
    }
}
