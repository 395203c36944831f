//! Periodic transmit loops, one per scheduled message.
//!
//! Each loop owns its ticker and runs strictly sequentially: snapshot the
//! caller's values, encode, transmit, wait for the next tick. A tick that
//! arrives while a transmit is still in flight is coalesced by the ticker,
//! so there is never more than one outstanding send per message. Loops
//! share nothing mutable with each other, which keeps a failing message
//! from affecting any other.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cn_dbc::{Database, RangePolicy};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, Ticker};
use crate::error::{RunnerError, RunnerResult};
use crate::events::{EventSink, Phase, RuntimeEvent};
use crate::interface::FrameTransmitter;
use crate::types::{CanFrame, LoopExit};
use crate::values::SignalSource;

/// A message registered for transmission.
#[derive(Clone)]
pub struct ScheduledMessage {
    pub id: u32,
    /// Transmission period; `None` transmits only on wake-up.
    pub period: Option<Duration>,
    pub source: Arc<dyn SignalSource>,
    /// Triggers an immediate transmission (event-driven messages).
    pub wake: Arc<Notify>,
}

impl ScheduledMessage {
    pub fn new(id: u32, period: Option<Duration>, source: Arc<dyn SignalSource>) -> Self {
        Self {
            id,
            period,
            source,
            wake: Arc::new(Notify::new()),
        }
    }
}

/// Owns the set of scheduled messages and spawns their loops.
pub struct MessageScheduler {
    db: Arc<Database>,
    transmitter: Arc<dyn FrameTransmitter>,
    policy: RangePolicy,
    messages: Vec<ScheduledMessage>,
}

impl MessageScheduler {
    pub fn new(
        db: Arc<Database>,
        transmitter: Arc<dyn FrameTransmitter>,
        policy: RangePolicy,
    ) -> Self {
        Self {
            db,
            transmitter,
            policy,
            messages: Vec::new(),
        }
    }

    /// Register a message. Fails if the id is unknown, already scheduled,
    /// longer than the transport can carry, or has a zero period.
    pub fn schedule(&mut self, message: ScheduledMessage) -> RunnerResult<()> {
        let Some(codec) = self.db.message(message.id) else {
            return Err(RunnerError::UnknownMessage(message.id));
        };
        let max = self.transmitter.max_frame_length();
        if codec.length() > max {
            return Err(RunnerError::FrameTooLong {
                id: message.id,
                length: codec.length(),
                max,
            });
        }
        if self.messages.iter().any(|m| m.id == message.id) {
            return Err(RunnerError::AlreadyScheduled(message.id));
        }
        if message.period == Some(Duration::ZERO) {
            return Err(RunnerError::NoPeriod(message.id));
        }
        tracing::debug!(
            message_id = message.id,
            period_ms = message.period.map(|p| p.as_millis() as u64),
            "message scheduled"
        );
        self.messages.push(message);
        Ok(())
    }

    pub fn scheduled_ids(&self) -> Vec<u32> {
        self.messages.iter().map(|m| m.id).collect()
    }

    pub fn get(&self, id: u32) -> Option<&ScheduledMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Request an immediate transmission of `id`, coalesced with any
    /// request that is still pending.
    pub fn trigger(&self, id: u32) -> RunnerResult<()> {
        let message = self.get(id).ok_or(RunnerError::NotScheduled(id))?;
        message.wake.notify_one();
        Ok(())
    }

    /// Build one loop per scheduled message. Tickers are created here, so
    /// every loop's first deadline is one period after this call.
    pub(crate) fn loops(
        &self,
        clock: &Arc<dyn Clock>,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Vec<TransmitLoop> {
        let mut seen = HashSet::new();
        self.messages
            .iter()
            .filter(|m| seen.insert(m.id))
            .map(|m| TransmitLoop {
                db: Arc::clone(&self.db),
                id: m.id,
                source: Arc::clone(&m.source),
                wake: Arc::clone(&m.wake),
                ticker: m.period.map(|p| clock.ticker(p)),
                transmitter: Arc::clone(&self.transmitter),
                clock: Arc::clone(clock),
                cancel: cancel.clone(),
                sink: sink.clone(),
                policy: self.policy,
            })
            .collect()
    }
}

/// Everything one transmit loop needs, moved into its task.
pub(crate) struct TransmitLoop {
    db: Arc<Database>,
    id: u32,
    source: Arc<dyn SignalSource>,
    wake: Arc<Notify>,
    ticker: Option<Box<dyn Ticker>>,
    transmitter: Arc<dyn FrameTransmitter>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    sink: EventSink,
    policy: RangePolicy,
}

impl TransmitLoop {
    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Run until cancelled or until the transport fails fatally.
    pub(crate) async fn run(mut self) -> LoopExit {
        let mut last_sent: Option<Vec<u8>> = None;
        tracing::debug!(message_id = self.id, "transmit loop started");

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = next_tick(&mut self.ticker) => {}
                () = self.wake.notified() => {
                    tracing::trace!(message_id = self.id, "wake-up trigger");
                }
            }

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                outcome = self.transmit_once() => outcome,
            };

            match outcome {
                Ok(frame) => {
                    tracing::trace!(
                        message_id = self.id,
                        changed = last_sent.as_deref() != Some(frame.as_slice()),
                        "frame sent"
                    );
                    last_sent = Some(frame);
                }
                Err(e) => {
                    let phase = match e {
                        RunnerError::Codec(_) => Phase::Encode,
                        _ => Phase::Transmit,
                    };
                    let fatal = e.is_fatal();
                    self.sink
                        .report(RuntimeEvent::new(Some(self.id), phase, e, self.clock.now()));
                    if fatal {
                        tracing::error!(message_id = self.id, "transmit loop stopped");
                        return LoopExit::Fatal;
                    }
                }
            }
        }

        tracing::debug!(message_id = self.id, "transmit loop cancelled");
        LoopExit::Cancelled
    }

    /// One snapshot -> encode -> transmit attempt. Returns the frame bytes
    /// that went out.
    async fn transmit_once(&self) -> RunnerResult<Vec<u8>> {
        let codec = self
            .db
            .message(self.id)
            .ok_or(RunnerError::UnknownMessage(self.id))?;
        let snapshot = self.source.snapshot().await;
        let data = codec.encode_with_policy(&snapshot.values, snapshot.multiplexor, self.policy)?;
        let frame = CanFrame::new(self.id, data);
        self.transmitter.transmit(&frame).await?;
        Ok(frame.data)
    }
}

async fn next_tick(ticker: &mut Option<Box<dyn Ticker>>) {
    match ticker {
        Some(ticker) => ticker.tick().await,
        None => std::future::pending().await,
    }
}
