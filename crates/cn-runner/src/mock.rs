//! Mock transport and manual clock for testing.
//!
//! `MockTransport` records transmitted frames, can be told to fail every
//! transmit of a given id, and serves scripted inbound frames. `ManualClock`
//! only moves when a test calls [`ManualClock::advance`]. Together they let
//! the whole runtime run deterministically without hardware or wall time.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};

use crate::clock::{Clock, Ticker};
use crate::error::{TransportError, TransportResult};
use crate::interface::{FrameReceiver, FrameTransmitter};
use crate::types::CanFrame;

type Inbound = TransportResult<CanFrame>;

/// In-memory transport implementing both transport traits.
pub struct MockTransport {
    /// Frames successfully transmitted (for test assertions).
    sent: Mutex<Vec<CanFrame>>,
    /// Transmit attempts per id, including failed ones.
    attempts: Mutex<HashMap<u32, usize>>,
    /// Ids whose transmit always fails, with the error to return.
    failing: Mutex<HashMap<u32, TransportError>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<Inbound>>,
    max_frame_length: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashMap::new()),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: AsyncMutex::new(rx),
            max_frame_length: cn_dbc::MAX_FRAME_LENGTH,
        }
    }

    /// Limit the payload size, e.g. to 8 bytes to act like a classic CAN
    /// socket.
    pub fn with_max_frame_length(mut self, len: usize) -> Self {
        self.max_frame_length = len;
        self
    }

    /// Queue a frame for `receive`.
    pub fn queue_frame(&self, frame: CanFrame) {
        self.push_inbound(Ok(frame));
    }

    /// Queue an error for `receive`.
    pub fn queue_error(&self, error: TransportError) {
        self.push_inbound(Err(error));
    }

    /// Close the inbound stream: once drained, `receive` returns `Closed`.
    pub fn close(&self) {
        self.inbound_tx.lock().unwrap().take();
    }

    /// Make every transmit of `id` fail with `error`.
    pub fn fail_transmit(&self, id: u32, error: TransportError) {
        self.failing.lock().unwrap().insert(id, error);
    }

    /// Let transmits of `id` succeed again.
    pub fn heal_transmit(&self, id: u32) {
        self.failing.lock().unwrap().remove(&id);
    }

    /// Copies of all frames that were sent.
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.sent.lock().unwrap().clone()
    }

    /// Frames sent with the given id.
    pub fn sent_with_id(&self, id: u32) -> Vec<CanFrame> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.id == id)
            .cloned()
            .collect()
    }

    /// Number of transmit calls for `id`, successful or not.
    pub fn attempts(&self, id: u32) -> usize {
        self.attempts.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn last_sent(&self) -> Option<CanFrame> {
        self.sent.lock().unwrap().last().cloned()
    }

    fn push_inbound(&self, item: Inbound) {
        if let Some(tx) = self.inbound_tx.lock().unwrap().as_ref() {
            let _ = tx.send(item);
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameTransmitter for MockTransport {
    async fn transmit(&self, frame: &CanFrame) -> TransportResult<()> {
        *self.attempts.lock().unwrap().entry(frame.id).or_insert(0) += 1;

        if let Some(error) = self.failing.lock().unwrap().get(&frame.id) {
            return Err(error.clone());
        }

        self.sent.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

#[async_trait]
impl FrameReceiver for MockTransport {
    async fn receive(&self) -> TransportResult<CanFrame> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Some(item) => item,
            None => Err(TransportError::Closed),
        }
    }
}

/// Clock that only advances when told to.
pub struct ManualClock {
    start: DateTime<Utc>,
    elapsed: watch::Sender<Duration>,
}

impl ManualClock {
    /// A clock starting at the Unix epoch.
    pub fn new() -> Self {
        Self::starting_at(DateTime::<Utc>::default())
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        let (elapsed, _) = watch::channel(Duration::ZERO);
        Self { start, elapsed }
    }

    /// Move time forward, waking every ticker whose deadline has passed.
    pub fn advance(&self, by: Duration) {
        self.elapsed.send_modify(|elapsed| *elapsed += by);
    }

    /// Time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.borrow()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.start + TimeDelta::from_std(self.elapsed()).unwrap_or(TimeDelta::zero())
    }

    fn ticker(&self, period: Duration) -> Box<dyn Ticker> {
        let rx = self.elapsed.subscribe();
        let next = *rx.borrow() + period;
        Box::new(ManualTicker { rx, period, next })
    }
}

struct ManualTicker {
    rx: watch::Receiver<Duration>,
    period: Duration,
    next: Duration,
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        loop {
            let now = *self.rx.borrow_and_update();
            if now >= self.next {
                // Coalesce every deadline that has already passed.
                while self.next <= now {
                    self.next += self.period;
                }
                return;
            }
            if self.rx.changed().await.is_err() {
                // Clock dropped: time never moves again.
                std::future::pending::<()>().await;
            }
        }
    }
}
