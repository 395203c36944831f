//! Core runtime types: frames and loop identities.

use serde::Serialize;

/// Highest standard (11-bit) CAN identifier.
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// A raw CAN frame as handed to / received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// CAN arbitration ID (11-bit standard or 29-bit extended).
    pub id: u32,
    /// Data payload.
    pub data: Vec<u8>,
}

impl CanFrame {
    pub fn new(id: u32, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    /// Ids above the 11-bit range need an extended (29-bit) frame.
    pub fn is_extended(&self) -> bool {
        self.id > MAX_STANDARD_ID
    }
}

/// Identity of one runtime loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "loop", content = "message_id", rename_all = "snake_case")]
pub enum LoopId {
    /// Periodic transmit loop of one message.
    Transmit(u32),
    /// The single receive/dispatch loop.
    Receive,
}

/// Why a loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Cancellation was requested.
    Cancelled,
    /// The transport reported a fatal error for this loop.
    Fatal,
}
