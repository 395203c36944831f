//! Concurrent runtime for one logical CAN node.
//!
//! - `MessageScheduler`: one periodic transmit loop per scheduled message
//! - `ReceiveDispatcher`: one receive loop decoding and routing frames
//! - `Runner`: lifecycle (`start`/`stop`) over both, sharing one
//!   cancellation token
//!
//! Time comes from an injected [`Clock`] and the bus from the
//! [`FrameTransmitter`]/[`FrameReceiver`] traits, so the whole runtime runs
//! deterministically against [`mock::MockTransport`] and
//! [`mock::ManualClock`].

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod interface;
pub mod mock;
pub mod runner;
pub mod scheduler;
pub mod types;
pub mod values;

pub use clock::{Clock, SystemClock, Ticker};
pub use config::RunnerConfig;
pub use dispatcher::{Delivery, ReceiveDispatcher, SubscriptionId};
pub use error::{RunnerError, RunnerResult, TransportError, TransportResult};
pub use events::{EventSink, Phase, RuntimeEvent};
pub use interface::{FrameReceiver, FrameTransmitter};
#[cfg(target_os = "linux")]
pub use interface::SocketCanTransport;
pub use runner::{Health, Runner, RunnerState};
pub use scheduler::{MessageScheduler, ScheduledMessage};
pub use types::{CanFrame, LoopExit, LoopId, MAX_STANDARD_ID};
pub use values::{SharedSignals, SignalSnapshot, SignalSource, shared};
