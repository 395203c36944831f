//! Receive-side routing: frame -> decode -> subscribers.
//!
//! One receive loop owns the receiver. Each frame is decoded once and handed
//! to every subscriber of its id through that subscriber's bounded queue.
//! A full queue drops the delivery for that subscriber only and counts the
//! drop; the receive loop itself never waits on a consumer.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use cn_dbc::{Database, DecodedMessage};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::{RunnerError, TransportError};
use crate::events::{EventSink, Phase, RuntimeEvent};
use crate::interface::FrameReceiver;
use crate::types::{CanFrame, LoopExit};

/// Handle returned by `subscribe`, used to unsubscribe.
pub type SubscriptionId = u64;

/// One decoded message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Arc<DecodedMessage>,
    pub timestamp: DateTime<Utc>,
}

struct Subscription {
    id: SubscriptionId,
    message_ids: Vec<u32>,
    tx: mpsc::Sender<Delivery>,
    dropped: u64,
}

#[derive(Default)]
struct SubscriptionTable {
    next_id: SubscriptionId,
    /// Kept in registration order.
    entries: Vec<Subscription>,
}

/// Routes decoded frames to subscribers. Cheap to clone; clones share the
/// same subscription table.
#[derive(Clone)]
pub struct ReceiveDispatcher {
    db: Arc<Database>,
    table: Arc<Mutex<SubscriptionTable>>,
    strict: bool,
    capacity: usize,
}

impl ReceiveDispatcher {
    /// `strict` reports frames with unknown ids instead of ignoring them.
    /// `capacity` bounds each subscriber's queue.
    pub fn new(db: Arc<Database>, strict: bool, capacity: usize) -> Self {
        Self {
            db,
            table: Arc::new(Mutex::new(SubscriptionTable::default())),
            strict,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe a callback to `ids`. The callback runs on its own task, in
    /// delivery order; a slow callback only loses its own deliveries.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, ids: &[u32], mut callback: F) -> SubscriptionId
    where
        F: FnMut(&DecodedMessage, DateTime<Utc>) + Send + 'static,
    {
        let (id, mut rx) = self.subscribe_channel(ids);
        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                callback(&*delivery.message, delivery.timestamp);
            }
            tracing::trace!(subscription = id, "subscriber task finished");
        });
        id
    }

    /// Subscribe to `ids` and receive deliveries on a bounded channel.
    /// Dropping the receiver ends the subscription.
    pub fn subscribe_channel(&self, ids: &[u32]) -> (SubscriptionId, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut table = self.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push(Subscription {
            id,
            message_ids: ids.to_vec(),
            tx,
            dropped: 0,
        });
        tracing::debug!(subscription = id, ids = ?ids, "subscriber registered");
        (id, rx)
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut table = self.lock();
        let before = table.entries.len();
        table.entries.retain(|s| s.id != id);
        table.entries.len() != before
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Deliveries dropped for `id` because its queue was full.
    pub fn dropped(&self, id: SubscriptionId) -> Option<u64> {
        self.lock()
            .entries
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.dropped)
    }

    /// Decode `frame` and deliver it to every subscriber of its id.
    /// Returns how many subscribers accepted it.
    pub fn dispatch(&self, frame: &CanFrame, timestamp: DateTime<Utc>, sink: &EventSink) -> usize {
        let Some(codec) = self.db.message(frame.id) else {
            if self.strict {
                sink.report(RuntimeEvent::new(
                    Some(frame.id),
                    Phase::Receive,
                    RunnerError::UnknownMessage(frame.id),
                    timestamp,
                ));
            } else {
                tracing::trace!(id = frame.id, "ignoring unknown frame");
            }
            return 0;
        };

        let decoded = match codec.decode(&frame.data) {
            Ok(decoded) => Arc::new(decoded),
            Err(e) => {
                sink.report(RuntimeEvent::new(Some(frame.id), Phase::Decode, e, timestamp));
                return 0;
            }
        };

        let mut delivered = 0;
        let mut table = self.lock();
        table.entries.retain_mut(|sub| {
            if !sub.message_ids.contains(&frame.id) {
                return true;
            }
            let delivery = Delivery {
                message: Arc::clone(&decoded),
                timestamp,
            };
            match sub.tx.try_send(delivery) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    sub.dropped += 1;
                    tracing::debug!(
                        subscription = sub.id,
                        message_id = frame.id,
                        dropped = sub.dropped,
                        "subscriber queue full, delivery dropped"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(subscription = sub.id, "subscriber gone, removing");
                    false
                }
            }
        });
        delivered
    }

    /// Receive until cancelled or until the receiver fails fatally.
    pub(crate) async fn run(
        self,
        receiver: Arc<dyn FrameReceiver>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
        sink: EventSink,
    ) -> LoopExit {
        tracing::debug!("receive loop started");
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!("receive loop cancelled");
                    return LoopExit::Cancelled;
                }
                result = receiver.receive() => result,
            };

            match result {
                Ok(frame) => {
                    self.dispatch(&frame, clock.now(), &sink);
                }
                Err(TransportError::Transient(msg)) => {
                    sink.report(RuntimeEvent::new(
                        None,
                        Phase::Receive,
                        RunnerError::TransportTransient(msg),
                        clock.now(),
                    ));
                }
                Err(e) => {
                    sink.report(RuntimeEvent::new(None, Phase::Receive, e, clock.now()));
                    tracing::error!("receive loop stopped");
                    return LoopExit::Fatal;
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SubscriptionTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::{ManualClock, MockTransport};
    use cn_dbc::{BitOrder, DatabaseDef, MessageDef, Signal, SignalLayout};

    fn db() -> Arc<Database> {
        Arc::new(
            Database::new(DatabaseDef {
                messages: vec![
                    MessageDef::new(0x100, "Speed", 2).with_signal(Signal::new(
                        "kph",
                        SignalLayout::new(0, 16, BitOrder::LsbFirst),
                    )),
                    MessageDef::new(0x200, "Gear", 1).with_signal(Signal::new(
                        "gear",
                        SignalLayout::new(0, 4, BitOrder::LsbFirst),
                    )),
                ],
                ..Default::default()
            })
            .unwrap(),
        )
    }

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::default()
    }

    #[tokio::test]
    async fn delivers_only_to_matching_subscribers() {
        let dispatcher = ReceiveDispatcher::new(db(), false, 8);
        let (_, mut speed) = dispatcher.subscribe_channel(&[0x100]);
        let (_, mut gear) = dispatcher.subscribe_channel(&[0x200]);

        let n = dispatcher.dispatch(
            &CanFrame::new(0x100, vec![0x34, 0x12]),
            now(),
            &EventSink::default(),
        );
        assert_eq!(n, 1);

        let delivery = speed.try_recv().unwrap();
        assert_eq!(delivery.message.name, "Speed");
        assert_eq!(delivery.message.get("kph"), Some(4660.0));
        assert!(gear.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_ids_reported_only_in_strict_mode() {
        let sink = EventSink::default();
        let mut events = sink.subscribe();

        let lenient = ReceiveDispatcher::new(db(), false, 8);
        assert_eq!(lenient.dispatch(&CanFrame::new(0x7AB, vec![0]), now(), &sink), 0);
        assert!(events.try_recv().is_err());

        let strict = ReceiveDispatcher::new(db(), true, 8);
        strict.dispatch(&CanFrame::new(0x7AB, vec![0]), now(), &sink);
        let event = events.try_recv().unwrap();
        assert_eq!(event.phase, Phase::Receive);
        assert_eq!(event.error, RunnerError::UnknownMessage(0x7AB));
    }

    #[tokio::test]
    async fn short_frames_are_decode_errors() {
        let sink = EventSink::default();
        let mut events = sink.subscribe();
        let dispatcher = ReceiveDispatcher::new(db(), false, 8);
        let (_, mut rx) = dispatcher.subscribe_channel(&[0x100]);

        assert_eq!(dispatcher.dispatch(&CanFrame::new(0x100, vec![0x01]), now(), &sink), 0);
        assert_eq!(events.try_recv().unwrap().phase, Phase::Decode);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_newest_and_counts() {
        let dispatcher = ReceiveDispatcher::new(db(), false, 1);
        let (slow_id, mut slow) = dispatcher.subscribe_channel(&[0x200]);
        let (fast_id, mut fast) = dispatcher.subscribe_channel(&[0x200]);
        let sink = EventSink::default();

        dispatcher.dispatch(&CanFrame::new(0x200, vec![1]), now(), &sink);
        assert_eq!(fast.try_recv().unwrap().message.get("gear"), Some(1.0));
        dispatcher.dispatch(&CanFrame::new(0x200, vec![2]), now(), &sink);
        assert_eq!(fast.try_recv().unwrap().message.get("gear"), Some(2.0));

        // Slow subscriber kept its first delivery and lost the second.
        assert_eq!(slow.try_recv().unwrap().message.get("gear"), Some(1.0));
        assert!(slow.try_recv().is_err());
        assert_eq!(dispatcher.dropped(slow_id), Some(1));
        assert_eq!(dispatcher.dropped(fast_id), Some(0));
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let dispatcher = ReceiveDispatcher::new(db(), false, 4);
        let (_, rx) = dispatcher.subscribe_channel(&[0x200]);
        drop(rx);
        assert_eq!(dispatcher.subscription_count(), 1);

        dispatcher.dispatch(&CanFrame::new(0x200, vec![1]), now(), &EventSink::default());
        assert_eq!(dispatcher.subscription_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let dispatcher = ReceiveDispatcher::new(db(), false, 4);
        let (id, mut rx) = dispatcher.subscribe_channel(&[0x200]);
        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));

        dispatcher.dispatch(&CanFrame::new(0x200, vec![1]), now(), &EventSink::default());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn callbacks_run_in_order() {
        let dispatcher = ReceiveDispatcher::new(db(), false, 8);
        let (tx, mut seen) = mpsc::unbounded_channel();
        dispatcher.subscribe(&[0x200], move |msg, _| {
            let _ = tx.send(msg.get("gear").unwrap());
        });

        for gear in 1..=3u8 {
            dispatcher.dispatch(&CanFrame::new(0x200, vec![gear]), now(), &EventSink::default());
        }
        for expected in [1.0, 2.0, 3.0] {
            assert_eq!(seen.recv().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn receive_loop_survives_transient_errors() {
        let mock = Arc::new(MockTransport::new());
        let dispatcher = ReceiveDispatcher::new(db(), false, 8);
        let (_, mut rx) = dispatcher.subscribe_channel(&[0x200]);
        let sink = EventSink::default();
        let mut events = sink.subscribe();

        mock.queue_error(TransportError::Transient("bus glitch".into()));
        mock.queue_frame(CanFrame::new(0x200, vec![5]));
        mock.close();

        let exit = dispatcher
            .clone()
            .run(
                mock.clone(),
                Arc::new(ManualClock::new()),
                CancellationToken::new(),
                sink,
            )
            .await;

        assert_eq!(exit, LoopExit::Fatal);
        assert_eq!(rx.recv().await.unwrap().message.get("gear"), Some(5.0));
        assert!(matches!(
            events.recv().await.unwrap().error,
            RunnerError::TransportTransient(_)
        ));
        assert!(events.recv().await.unwrap().error.is_fatal());
    }

    #[tokio::test]
    async fn receive_loop_stops_on_cancel() {
        let mock = Arc::new(MockTransport::new());
        let dispatcher = ReceiveDispatcher::new(db(), false, 8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(dispatcher.run(
            mock,
            Arc::new(ManualClock::new()),
            cancel.clone(),
            EventSink::default(),
        ));
        cancel.cancel();

        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, LoopExit::Cancelled);
    }
}
