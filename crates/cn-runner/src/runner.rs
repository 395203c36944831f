//! Node lifecycle: wires the scheduler and the dispatcher to a transport
//! and runs all loops under one cancellation token.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cn_dbc::{Database, SendType};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::RunnerConfig;
use crate::dispatcher::ReceiveDispatcher;
use crate::error::{RunnerError, RunnerResult};
use crate::events::{EventSink, RuntimeEvent};
use crate::interface::{FrameReceiver, FrameTransmitter};
use crate::scheduler::{MessageScheduler, ScheduledMessage};
use crate::types::{LoopExit, LoopId};
use crate::values::SignalSource;

/// Lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Point-in-time health report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Health {
    pub state: RunnerState,
    /// Loops that ended on a fatal transport error while the rest kept
    /// running.
    pub failed_loops: Vec<LoopId>,
}

impl Health {
    pub fn is_degraded(&self) -> bool {
        !self.failed_loops.is_empty()
    }
}

/// A running CAN node.
pub struct Runner {
    db: Arc<Database>,
    node: String,
    config: RunnerConfig,
    scheduler: MessageScheduler,
    dispatcher: ReceiveDispatcher,
    receiver: Arc<dyn FrameReceiver>,
    clock: Arc<dyn Clock>,
    sink: EventSink,
    state: RunnerState,
    cancel: CancellationToken,
    tasks: JoinSet<(LoopId, LoopExit)>,
    failed: Arc<Mutex<BTreeSet<LoopId>>>,
}

impl Runner {
    /// Create a runner for `node`. Nothing runs until [`start`](Self::start).
    pub fn new(
        db: Arc<Database>,
        node: impl Into<String>,
        transmitter: Arc<dyn FrameTransmitter>,
        receiver: Arc<dyn FrameReceiver>,
        config: RunnerConfig,
    ) -> Self {
        let scheduler = MessageScheduler::new(Arc::clone(&db), transmitter, config.range_policy);
        let dispatcher = ReceiveDispatcher::new(
            Arc::clone(&db),
            config.strict,
            config.subscription_capacity,
        );
        let sink = EventSink::new(config.event_capacity);
        Self {
            db,
            node: node.into(),
            config,
            scheduler,
            dispatcher,
            receiver,
            clock: Arc::new(SystemClock),
            sink,
            state: RunnerState::Created,
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
            failed: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Replace the time source (tests inject a manual clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Schedule a message this node transmits. The period is the message's
    /// cycle time, falling back to `default_period_ms`. Event messages
    /// without either are sent only on [`trigger`](Self::trigger).
    pub fn schedule(&mut self, id: u32, source: Arc<dyn SignalSource>) -> RunnerResult<()> {
        let codec = self.transmittable(id)?;
        let period = codec
            .cycle_time_ms()
            .or(self.config.default_period_ms)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        if period.is_none() && codec.send_type() != SendType::Event {
            return Err(RunnerError::NoPeriod(id));
        }
        self.scheduler
            .schedule(ScheduledMessage::new(id, period, source))
    }

    /// Schedule a message with an explicit period, ignoring its cycle time.
    pub fn schedule_with_period(
        &mut self,
        id: u32,
        period: Duration,
        source: Arc<dyn SignalSource>,
    ) -> RunnerResult<()> {
        self.transmittable(id)?;
        self.scheduler
            .schedule(ScheduledMessage::new(id, Some(period), source))
    }

    pub fn scheduled_ids(&self) -> Vec<u32> {
        self.scheduler.scheduled_ids()
    }

    /// Transmit a scheduled message now, outside its period.
    pub fn trigger(&self, id: u32) -> RunnerResult<()> {
        self.scheduler.trigger(id)
    }

    /// Subscription handle; clones share the same subscriber table.
    pub fn dispatcher(&self) -> &ReceiveDispatcher {
        &self.dispatcher
    }

    /// Observe reported loop errors.
    pub fn events(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.sink.subscribe()
    }

    /// Spawn every transmit loop and the receive loop. Must be called from
    /// within a Tokio runtime.
    pub fn start(&mut self) -> RunnerResult<()> {
        match self.state {
            RunnerState::Created => {}
            RunnerState::Running => return Err(RunnerError::AlreadyRunning),
            RunnerState::Stopping | RunnerState::Stopped => return Err(RunnerError::AlreadyStopped),
        }

        let loops = self.scheduler.loops(&self.clock, &self.cancel, &self.sink);
        let transmit_count = loops.len();
        for transmit in loops {
            let loop_id = LoopId::Transmit(transmit.id());
            let failed = Arc::clone(&self.failed);
            self.tasks.spawn(async move {
                let exit = transmit.run().await;
                record_exit(&failed, loop_id, exit);
                (loop_id, exit)
            });
        }

        let dispatcher = self.dispatcher.clone();
        let receiver = Arc::clone(&self.receiver);
        let clock = Arc::clone(&self.clock);
        let cancel = self.cancel.clone();
        let sink = self.sink.clone();
        let failed = Arc::clone(&self.failed);
        self.tasks.spawn(async move {
            let exit = dispatcher.run(receiver, clock, cancel, sink).await;
            record_exit(&failed, LoopId::Receive, exit);
            (LoopId::Receive, exit)
        });

        self.state = RunnerState::Running;
        tracing::info!(
            node = %self.node,
            transmit_loops = transmit_count,
            "runner started"
        );
        Ok(())
    }

    /// Cancel every loop and wait until all of them have returned.
    pub async fn stop(&mut self) -> RunnerResult<()> {
        match self.state {
            RunnerState::Created => {
                self.cancel.cancel();
                self.state = RunnerState::Stopped;
                return Ok(());
            }
            RunnerState::Running => {}
            RunnerState::Stopping | RunnerState::Stopped => return Err(RunnerError::AlreadyStopped),
        }

        self.state = RunnerState::Stopping;
        tracing::info!(node = %self.node, "stopping runner");
        self.cancel.cancel();
        self.join_all().await;
        self.state = RunnerState::Stopped;
        tracing::info!(node = %self.node, "runner stopped");
        Ok(())
    }

    /// Wait for every loop to end on its own (all of them hit fatal
    /// transport errors, or another handle cancelled them).
    pub async fn wait(&mut self) -> RunnerResult<()> {
        match self.state {
            RunnerState::Running => {}
            RunnerState::Created => return Ok(()),
            RunnerState::Stopping | RunnerState::Stopped => return Err(RunnerError::AlreadyStopped),
        }
        self.join_all().await;
        self.state = RunnerState::Stopped;
        Ok(())
    }

    pub fn health(&self) -> Health {
        let failed = self.failed.lock().unwrap_or_else(PoisonError::into_inner);
        Health {
            state: self.state,
            failed_loops: failed.iter().copied().collect(),
        }
    }

    /// A token that cancels this runner's loops when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn transmittable(&self, id: u32) -> RunnerResult<&cn_dbc::MessageCodec> {
        match self.state {
            RunnerState::Created => {}
            RunnerState::Running => return Err(RunnerError::AlreadyRunning),
            RunnerState::Stopping | RunnerState::Stopped => return Err(RunnerError::AlreadyStopped),
        }
        let codec = self
            .db
            .message(id)
            .ok_or(RunnerError::UnknownMessage(id))?;
        if !self.db.transmitted_by(&self.node).contains(&id) {
            return Err(RunnerError::NotTransmitted {
                id,
                node: self.node.clone(),
            });
        }
        Ok(codec)
    }

    async fn join_all(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((loop_id, exit)) => {
                    tracing::debug!(loop_id = ?loop_id, exit = ?exit, "loop joined");
                }
                Err(e) => {
                    tracing::error!(error = %e, "loop task panicked");
                }
            }
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn record_exit(failed: &Mutex<BTreeSet<LoopId>>, loop_id: LoopId, exit: LoopExit) {
    if exit == LoopExit::Fatal {
        failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(loop_id);
    }
}
