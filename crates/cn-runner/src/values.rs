//! Caller-owned sources of current signal values.
//!
//! The runtime never owns the values it transmits. Each scheduled message
//! holds a read accessor ([`SignalSource`]) and takes a consistent snapshot
//! on every tick, while application code writes through its own handle.

use std::sync::Arc;

use async_trait::async_trait;
use cn_dbc::SignalValues;
use tokio::sync::RwLock;

/// Values to encode into one message, plus the multiplexor selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalSnapshot {
    pub values: SignalValues,
    /// Raw selector value; `None` takes the selector from `values`.
    pub multiplexor: Option<u64>,
}

impl SignalSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn with_multiplexor(mut self, value: u64) -> Self {
        self.multiplexor = Some(value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }
}

/// Read accessor the scheduler uses to obtain current values.
///
/// Implementations must be internally synchronized: the scheduler reads
/// concurrently with application writers.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn snapshot(&self) -> SignalSnapshot;
}

#[async_trait]
impl SignalSource for RwLock<SignalSnapshot> {
    async fn snapshot(&self) -> SignalSnapshot {
        self.read().await.clone()
    }
}

/// Standard single-writer/many-reader value store.
pub type SharedSignals = Arc<RwLock<SignalSnapshot>>;

/// Wrap a snapshot for sharing between the application and the runtime.
pub fn shared(snapshot: SignalSnapshot) -> SharedSignals {
    Arc::new(RwLock::new(snapshot))
}
