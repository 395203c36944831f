//! Database construction input.
//!
//! These are the structures an external DBC parser hands over. They are
//! consumed verbatim by [`Database::new`](crate::Database::new); no textual
//! parsing happens in this crate. JSON is accepted through serde so that a
//! parsed database can be stored next to the node configuration.

use serde::{Deserialize, Serialize};

use crate::signal::Signal;

/// How a message is expected to be sent on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendType {
    /// Sent periodically on its cycle time.
    #[default]
    Cyclic,
    /// Sent when the application requests it.
    Event,
    /// No send type attribute in the source file.
    Unspecified,
}

/// One message as produced by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDef {
    pub id: u32,
    pub name: String,
    /// Declared data length (DLC) in bytes.
    pub length: usize,
    /// Transmitting node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default)]
    pub send_type: SendType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub signals: Vec<Signal>,
}

impl MessageDef {
    pub fn new(id: u32, name: impl Into<String>, length: usize) -> Self {
        Self {
            id,
            name: name.into(),
            length,
            sender: None,
            send_type: SendType::Cyclic,
            cycle_time_ms: None,
            description: None,
            signals: Vec::new(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_cycle_time(mut self, cycle_time_ms: u64) -> Self {
        self.cycle_time_ms = Some(cycle_time_ms);
        self
    }

    pub fn with_send_type(mut self, send_type: SendType) -> Self {
        self.send_type = send_type;
        self
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }
}

/// A whole parsed DBC document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseDef {
    #[serde(default)]
    pub version: String,
    /// Declared nodes (`BU_`).
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub messages: Vec<MessageDef>,
}
