//! Shared test harness for E2E integration tests.
//!
//! Builds a small vehicle database from JSON (the form an external DBC
//! parser hands over) and runs a real `Runner` against a `MockTransport`
//! and a `ManualClock`, so every loop is driven deterministically.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cn_dbc::Database;
use cn_runner::mock::{ManualClock, MockTransport};
use cn_runner::{Runner, RunnerConfig};

/// Two ECUs: `Engine` transmits sensors, status and a crash event; `Dash`
/// transmits a multiplexed display message that `Engine` receives.
pub const VEHICLE_DB: &str = r#"{
    "version": "1.4",
    "nodes": ["Engine", "Dash"],
    "messages": [
        {
            "id": 256,
            "name": "Sensors",
            "length": 8,
            "sender": "Engine",
            "cycle_time_ms": 10,
            "signals": [
                { "name": "X", "layout": { "start_bit": 0, "length": 8, "order": "lsb_first" } },
                {
                    "name": "Y",
                    "layout": { "start_bit": 8, "length": 16, "order": "lsb_first", "signed": true, "scale": 0.1 },
                    "unit": "degC"
                }
            ]
        },
        {
            "id": 257,
            "name": "Status",
            "length": 8,
            "sender": "Engine",
            "cycle_time_ms": 20,
            "signals": [
                {
                    "name": "B",
                    "layout": { "start_bit": 7, "length": 8, "order": "msb_first", "min": 0, "max": 200 }
                }
            ]
        },
        {
            "id": 258,
            "name": "Crash",
            "length": 1,
            "sender": "Engine",
            "send_type": "event",
            "signals": [
                { "name": "Deployed", "layout": { "start_bit": 0, "length": 1, "order": "lsb_first" } }
            ]
        },
        {
            "id": 512,
            "name": "DashMux",
            "length": 4,
            "sender": "Dash",
            "cycle_time_ms": 50,
            "signals": [
                {
                    "name": "Page",
                    "layout": { "start_bit": 0, "length": 4, "order": "lsb_first", "mux": "selector" },
                    "receivers": ["Engine"]
                },
                {
                    "name": "Mode",
                    "layout": { "start_bit": 4, "length": 4, "order": "lsb_first" },
                    "receivers": ["Engine"],
                    "value_descriptions": { "0": "Off", "1": "Eco", "2": "Sport" }
                },
                {
                    "name": "Brightness",
                    "layout": { "start_bit": 8, "length": 8, "order": "lsb_first", "mux": { "gated": 0 } },
                    "unit": "%",
                    "receivers": ["Engine"]
                },
                {
                    "name": "Volume",
                    "layout": { "start_bit": 8, "length": 16, "order": "lsb_first", "mux": { "gated": 1 } },
                    "receivers": ["Engine"]
                }
            ]
        }
    ]
}"#;

pub const SENSORS: u32 = 0x100;
pub const STATUS: u32 = 0x101;
pub const CRASH: u32 = 0x102;
pub const DASH_MUX: u32 = 0x200;

pub fn database() -> Arc<Database> {
    Arc::new(Database::from_json(VEHICLE_DB).expect("vehicle database is valid"))
}

/// A runner for one node on a mock bus with a manual clock.
pub struct TestHarness {
    pub db: Arc<Database>,
    pub bus: Arc<MockTransport>,
    pub clock: Arc<ManualClock>,
    pub runner: Runner,
}

impl TestHarness {
    /// `Engine` node with default runner config.
    pub fn engine() -> Self {
        Self::node("Engine", RunnerConfig::default())
    }

    pub fn node(node: &str, config: RunnerConfig) -> Self {
        let db = database();
        let bus = Arc::new(MockTransport::new());
        let clock = Arc::new(ManualClock::new());
        let runner = Runner::new(db.clone(), node, bus.clone(), bus.clone(), config)
            .with_clock(clock.clone());
        Self {
            db,
            bus,
            clock,
            runner,
        }
    }

    /// Advance the manual clock in `step_ms` increments, `steps` times,
    /// yielding in between so loops observe every step.
    pub async fn advance(&self, step_ms: u64, steps: usize) {
        for _ in 0..steps {
            self.clock.advance(Duration::from_millis(step_ms));
            tokio::task::yield_now().await;
        }
    }
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached within 2s");
}
