//! Observability sink for loop errors.
//!
//! Loops never terminate on what they report here (except on fatal
//! transport errors, which end only the affected loop). Every event is
//! logged through `tracing` and broadcast to any interested subscriber;
//! slow subscribers lag and lose events instead of blocking a loop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::RunnerError;

/// Where in the pipeline an error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Encode,
    Transmit,
    Receive,
    Decode,
}

/// One reported error.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeEvent {
    /// Message involved, if known.
    pub message_id: Option<u32>,
    pub phase: Phase,
    pub error: RunnerError,
    pub timestamp: DateTime<Utc>,
}

impl RuntimeEvent {
    pub fn new(
        message_id: Option<u32>,
        phase: Phase,
        error: impl Into<RunnerError>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            phase,
            error: error.into(),
            timestamp,
        }
    }
}

/// Cloneable handle loops report through.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<RuntimeEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.tx.subscribe()
    }

    pub fn report(&self, event: RuntimeEvent) {
        if event.error.is_fatal() {
            tracing::error!(
                message_id = event.message_id,
                phase = ?event.phase,
                error = %event.error,
                "loop error (fatal)"
            );
        } else {
            tracing::warn!(
                message_id = event.message_id,
                phase = ?event.phase,
                error = %event.error,
                "loop error"
            );
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(256)
    }
}
