//! Injectable time source.
//!
//! Transmit loops never touch `tokio::time` directly: they ask a [`Clock`]
//! for a [`Ticker`] and for timestamps. Production code uses
//! [`SystemClock`]; tests use [`ManualClock`](crate::mock::ManualClock) and
//! advance time explicitly.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::{self, Interval, MissedTickBehavior};

/// Periodic wake-up source.
#[async_trait]
pub trait Ticker: Send + Sync {
    /// Wait for the next tick. Ticks missed while the caller was busy are
    /// coalesced into one, never queued.
    async fn tick(&mut self);
}

/// Source of "now" and of periodic tickers.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// A ticker whose first tick fires one `period` from now.
    fn ticker(&self, period: Duration) -> Box<dyn Ticker>;
}

/// Wall clock backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn ticker(&self, period: Duration) -> Box<dyn Ticker> {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Box::new(IntervalTicker { interval })
    }
}

struct IntervalTicker {
    interval: Interval,
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
