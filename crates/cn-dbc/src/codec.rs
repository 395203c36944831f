//! Message codec: packs and unpacks a message's full signal set.
//!
//! A message may carry one multiplexor (selector) signal. The selector is
//! always present; signals gated on a multiplexor value are present only
//! when the selector's raw value matches. Encoding ignores values supplied
//! for signals that are inactive under the chosen selector value, so callers
//! can pass a superset of values.

use std::collections::HashMap;

use serde::Serialize;

use crate::def::{MessageDef, SendType};
use crate::error::{CodecError, CodecResult, DatabaseError, DatabaseResult};
use crate::layout::{Multiplexing, RangePolicy};
use crate::signal::Signal;

/// Largest supported frame (CAN FD).
pub const MAX_FRAME_LENGTH: usize = 64;

/// Physical signal values keyed by signal name.
pub type SignalValues = HashMap<String, f64>;

/// One decoded signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedSignal {
    pub name: String,
    /// Raw integer (sign-extended for signed signals). Wide enough for
    /// every 64-bit pattern of either signedness.
    pub raw: i128,
    /// Physical value, `raw * scale + offset`.
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Value table label for `raw`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A decoded frame: every signal active under the frame's multiplexor value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedMessage {
    pub id: u32,
    pub name: String,
    /// Raw selector value, if the message is multiplexed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplexor: Option<u64>,
    pub signals: Vec<DecodedSignal>,
}

impl DecodedMessage {
    pub fn signal(&self, name: &str) -> Option<&DecodedSignal> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Physical value of a decoded signal.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.signal(name).map(|s| s.value)
    }

    pub fn values(&self) -> SignalValues {
        self.signals
            .iter()
            .map(|s| (s.name.clone(), s.value))
            .collect()
    }
}

/// Packs/unpacks one message into a fixed-width frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageCodec {
    id: u32,
    name: String,
    length: usize,
    sender: Option<String>,
    send_type: SendType,
    cycle_time_ms: Option<u64>,
    description: Option<String>,
    signals: Vec<Signal>,
    selector: Option<usize>,
}

impl MessageCodec {
    /// Validate a parsed message definition and build its codec.
    pub fn new(def: MessageDef) -> DatabaseResult<Self> {
        if def.length == 0 || def.length > MAX_FRAME_LENGTH {
            return Err(DatabaseError::InvalidLength {
                message: def.name,
                length: def.length,
            });
        }

        let mut selector: Option<usize> = None;
        for (index, signal) in def.signals.iter().enumerate() {
            validate_signal(&def, signal)?;
            if signal.layout.is_selector() {
                if let Some(first) = selector {
                    return Err(DatabaseError::MultipleSelectors {
                        message: def.name.clone(),
                        first: def.signals[first].name.clone(),
                        second: signal.name.clone(),
                    });
                }
                selector = Some(index);
            }
        }

        for signal in &def.signals {
            let Some(value) = signal.layout.gated_on() else {
                continue;
            };
            let Some(sel) = selector.map(|i| &def.signals[i]) else {
                return Err(DatabaseError::MissingSelector {
                    message: def.name.clone(),
                    signal: signal.name.clone(),
                });
            };
            if sel.layout.check_raw(&sel.name, value).is_err() {
                return Err(DatabaseError::InvalidSignal {
                    message: def.name.clone(),
                    signal: signal.name.clone(),
                    reason: format!(
                        "multiplexor value {value} does not fit selector {}",
                        sel.name
                    ),
                });
            }
        }

        check_overlaps(&def)?;

        Ok(Self {
            id: def.id,
            name: def.name,
            length: def.length,
            sender: def.sender,
            send_type: def.send_type,
            cycle_time_ms: def.cycle_time_ms,
            description: def.description,
            signals: def.signals,
            selector,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared frame length (DLC) in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn send_type(&self) -> SendType {
        self.send_type
    }

    pub fn cycle_time_ms(&self) -> Option<u64> {
        self.cycle_time_ms
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// The multiplexor signal, if the message is multiplexed.
    pub fn selector(&self) -> Option<&Signal> {
        self.selector.map(|i| &self.signals[i])
    }

    pub fn is_multiplexed(&self) -> bool {
        self.selector.is_some()
    }

    /// Signals present in a frame whose selector holds `mux`: unconditional
    /// signals, the selector itself, and signals gated on `mux`.
    pub fn active_signals(&self, mux: Option<u64>) -> impl Iterator<Item = &Signal> {
        self.signals.iter().filter(move |s| match s.layout.mux {
            None | Some(Multiplexing::Selector) => true,
            Some(Multiplexing::Gated(value)) => mux == Some(value),
        })
    }

    /// Encode with the default [`RangePolicy::Reject`].
    pub fn encode(&self, values: &SignalValues, mux: Option<u64>) -> CodecResult<Vec<u8>> {
        self.encode_with_policy(values, mux, RangePolicy::Reject)
    }

    /// Encode `values` into a zero-initialized frame of exactly
    /// [`length`](Self::length) bytes.
    ///
    /// For multiplexed messages the selector raw value is `mux` when given,
    /// otherwise the selector's physical value from `values`. `mux` is
    /// ignored for messages without a selector.
    pub fn encode_with_policy(
        &self,
        values: &SignalValues,
        mux: Option<u64>,
        policy: RangePolicy,
    ) -> CodecResult<Vec<u8>> {
        let mut frame = vec![0u8; self.length];

        let selected = match self.selector() {
            Some(sel) => {
                let bits = match mux {
                    Some(raw) => sel.layout.check_raw(&sel.name, raw)?,
                    None => {
                        let value = self.value_of(values, sel)?;
                        sel.layout.to_raw(&sel.name, value, policy)?
                    }
                };
                sel.layout.write_raw(&mut frame, bits);
                Some(bits)
            }
            None => None,
        };

        for signal in self.active_signals(selected) {
            if signal.layout.is_selector() {
                continue;
            }
            let value = self.value_of(values, signal)?;
            signal.layout.pack(&signal.name, value, policy, &mut frame)?;
        }

        Ok(frame)
    }

    /// Decode a frame. Fails only when `data` is shorter than the declared
    /// length; trailing bytes are ignored.
    pub fn decode(&self, data: &[u8]) -> CodecResult<DecodedMessage> {
        if data.len() < self.length {
            return Err(CodecError::FrameTooShort {
                id: self.id,
                expected: self.length,
                actual: data.len(),
            });
        }
        let data = &data[..self.length];

        let multiplexor = self.selector().map(|sel| sel.layout.read_raw(data));
        let signals = self
            .active_signals(multiplexor)
            .map(|signal| {
                let bits = signal.layout.read_raw(data);
                let raw = signal.layout.raw_value(bits);
                DecodedSignal {
                    name: signal.name.clone(),
                    raw,
                    value: signal.layout.to_physical(bits),
                    unit: signal.unit.clone(),
                    description: signal.describe(raw).map(str::to_string),
                }
            })
            .collect();

        Ok(DecodedMessage {
            id: self.id,
            name: self.name.clone(),
            multiplexor,
            signals,
        })
    }

    fn value_of(&self, values: &SignalValues, signal: &Signal) -> CodecResult<f64> {
        values
            .get(&signal.name)
            .copied()
            .ok_or_else(|| CodecError::MissingSignal {
                message: self.name.clone(),
                signal: signal.name.clone(),
            })
    }
}

fn validate_signal(def: &MessageDef, signal: &Signal) -> DatabaseResult<()> {
    let layout = &signal.layout;
    let reason = if layout.length == 0 || layout.length > 64 {
        Some(format!("length {} outside 1..=64", layout.length))
    } else if !layout.scale.is_finite() || layout.scale == 0.0 {
        Some(format!("scale {} must be finite and non-zero", layout.scale))
    } else if !layout.offset.is_finite() {
        Some(format!("offset {} must be finite", layout.offset))
    } else if layout.min > layout.max {
        Some(format!("min {} exceeds max {}", layout.min, layout.max))
    } else {
        None
    };
    if let Some(reason) = reason {
        return Err(DatabaseError::InvalidSignal {
            message: def.name.clone(),
            signal: signal.name.clone(),
            reason,
        });
    }

    if !layout.fits_in(def.length) {
        return Err(DatabaseError::SignalOutOfFrame {
            message: def.name.clone(),
            signal: signal.name.clone(),
            length: def.length,
        });
    }
    Ok(())
}

/// Reject overlapping bit ranges among simultaneously active signals: the
/// unconditional set plus selector, and that set plus each gated group.
fn check_overlaps(def: &MessageDef) -> DatabaseResult<()> {
    let mut base: Vec<Option<usize>> = vec![None; def.length * 8];
    for (index, signal) in def.signals.iter().enumerate() {
        if signal.layout.gated_on().is_none() {
            occupy(def, &mut base, index)?;
        }
    }

    let mut groups: Vec<u64> = def
        .signals
        .iter()
        .filter_map(|s| s.layout.gated_on())
        .collect();
    groups.sort_unstable();
    groups.dedup();

    for value in groups {
        let mut occupied = base.clone();
        for (index, signal) in def.signals.iter().enumerate() {
            if signal.layout.gated_on() == Some(value) {
                occupy(def, &mut occupied, index)?;
            }
        }
    }
    Ok(())
}

fn occupy(def: &MessageDef, occupied: &mut [Option<usize>], index: usize) -> DatabaseResult<()> {
    let signal = &def.signals[index];
    for bit in signal.layout.bit_positions() {
        match occupied[bit] {
            Some(other) => {
                return Err(DatabaseError::OverlappingSignals {
                    message: def.name.clone(),
                    first: def.signals[other].name.clone(),
                    second: signal.name.clone(),
                    bit,
                });
            }
            None => occupied[bit] = Some(index),
        }
    }
    Ok(())
}
