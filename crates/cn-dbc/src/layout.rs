//! Signal bit geometry and the physical <-> raw mapping.
//!
//! Two bit-numbering conventions exist in DBC files:
//! - `LsbFirst` (Intel, `@1`): bit `n` is bit `n % 8` of byte `n / 8`, the
//!   start bit is the value's least-significant bit and the signal grows
//!   upward through the frame as one little-endian bit stream.
//! - `MsbFirst` (Motorola, `@0`): same bit numbering, but the start bit is
//!   the value's most-significant bit and the signal grows "sawtooth"
//!   style: 7, 6, .., 0, then 15, 14, .., 8, and so on.
//!
//! Both are expressed through [`BitOrder::next_bit_position`]; packing and
//! unpacking walk that traversal and never special-case a convention.

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};

/// Bit-numbering convention of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitOrder {
    /// Intel / little-endian.
    LsbFirst,
    /// Motorola / big-endian.
    MsbFirst,
}

impl BitOrder {
    /// Frame bit position that follows `current` in this convention's
    /// traversal order.
    pub fn next_bit_position(self, current: usize) -> usize {
        match self {
            BitOrder::LsbFirst => current + 1,
            BitOrder::MsbFirst => {
                if current % 8 == 0 {
                    current + 15
                } else {
                    current - 1
                }
            }
        }
    }
}

/// Multiplexing role of a signal within its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplexing {
    /// The message's multiplexor (selector) signal.
    Selector,
    /// Present only when the selector's raw value equals this value.
    Gated(u64),
}

/// What to do with a physical value outside `[min, max]` when packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePolicy {
    /// Fail with [`CodecError::ValueOutOfRange`].
    #[default]
    Reject,
    /// Clamp into range and log a warning.
    Clamp,
}

fn default_scale() -> f64 {
    1.0
}

/// Immutable bit geometry and scaling of one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalLayout {
    /// Start bit in DBC numbering.
    pub start_bit: u16,
    /// Length in bits (1..=64).
    pub length: u8,
    pub order: BitOrder,
    #[serde(default)]
    pub signed: bool,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    /// Physical minimum. `min == max == 0` means unbounded.
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux: Option<Multiplexing>,
}

impl SignalLayout {
    /// Unsigned, unscaled, unbounded layout. Mostly useful for building
    /// test fixtures with struct-update syntax.
    pub fn new(start_bit: u16, length: u8, order: BitOrder) -> Self {
        Self {
            start_bit,
            length,
            order,
            signed: false,
            scale: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            mux: None,
        }
    }

    /// Frame bit positions occupied by this signal, in traversal order.
    ///
    /// The first position holds the value's LSB for `LsbFirst` and its MSB
    /// for `MsbFirst`.
    pub fn bit_positions(&self) -> BitPositions {
        BitPositions {
            order: self.order,
            next: self.start_bit as usize,
            remaining: self.length as usize,
        }
    }

    /// Whether every bit of the signal lies inside a frame of `bytes` bytes.
    pub fn fits_in(&self, bytes: usize) -> bool {
        let limit = bytes * 8;
        self.bit_positions().all(|p| p < limit)
    }

    /// Whether the layout declares a physical range.
    pub fn is_bounded(&self) -> bool {
        !(self.min == 0.0 && self.max == 0.0)
    }

    pub fn is_selector(&self) -> bool {
        self.mux == Some(Multiplexing::Selector)
    }

    /// Multiplexor value this signal is gated on, if any.
    pub fn gated_on(&self) -> Option<u64> {
        match self.mux {
            Some(Multiplexing::Gated(value)) => Some(value),
            _ => None,
        }
    }

    fn mask(&self) -> u64 {
        if self.length >= 64 {
            u64::MAX
        } else {
            (1u64 << self.length) - 1
        }
    }

    /// Inclusive raw integer range representable in `length` bits.
    fn raw_bounds(&self) -> (f64, f64) {
        let len = i32::from(self.length);
        if self.signed {
            let half = 2f64.powi(len - 1);
            (-half, half - 1.0)
        } else {
            (0.0, 2f64.powi(len) - 1.0)
        }
    }

    /// Convert a physical value into the raw bit pattern (masked to
    /// `length` bits, two's complement for signed signals).
    pub fn to_raw(&self, name: &str, value: f64, policy: RangePolicy) -> CodecResult<u64> {
        let value = if self.is_bounded() && (value < self.min || value > self.max) {
            match policy {
                RangePolicy::Reject => {
                    return Err(CodecError::ValueOutOfRange {
                        signal: name.to_string(),
                        value,
                        min: self.min,
                        max: self.max,
                    });
                }
                RangePolicy::Clamp => {
                    let clamped = value.clamp(self.min, self.max);
                    tracing::warn!(
                        signal = name,
                        value,
                        clamped,
                        "physical value out of range, clamping"
                    );
                    clamped
                }
            }
        } else {
            value
        };

        let raw = ((value - self.offset) / self.scale).round();
        let (lo, hi) = self.raw_bounds();
        if !raw.is_finite() || raw < lo || raw > hi {
            return Err(CodecError::RawOutOfRange {
                signal: name.to_string(),
                raw,
                length: self.length,
            });
        }

        let bits = if self.signed {
            (raw as i64) as u64
        } else {
            raw as u64
        };
        Ok(bits & self.mask())
    }

    /// Check that a raw integer (e.g. a multiplexor value) fits the layout
    /// and return its masked bit pattern.
    pub fn check_raw(&self, name: &str, raw: u64) -> CodecResult<u64> {
        if raw & !self.mask() != 0 {
            return Err(CodecError::RawOutOfRange {
                signal: name.to_string(),
                raw: raw as f64,
                length: self.length,
            });
        }
        Ok(raw)
    }

    /// Interpret a raw bit pattern as a signed or unsigned integer.
    pub fn raw_value(&self, bits: u64) -> i128 {
        if self.signed {
            i128::from(sign_extend(bits, self.length as usize))
        } else {
            i128::from(bits)
        }
    }

    /// Convert a raw bit pattern into its physical value.
    pub fn to_physical(&self, bits: u64) -> f64 {
        let raw = if self.signed {
            sign_extend(bits, self.length as usize) as f64
        } else {
            bits as f64
        };
        snap_to_grid(raw * self.scale + self.offset, self.scale, self.offset)
    }

    /// Write a raw bit pattern into `frame`, leaving other bits untouched.
    pub fn write_raw(&self, frame: &mut [u8], bits: u64) {
        let len = self.length as usize;
        for (i, pos) in self.bit_positions().enumerate() {
            let shift = match self.order {
                BitOrder::LsbFirst => i,
                BitOrder::MsbFirst => len - 1 - i,
            };
            let Some(byte) = frame.get_mut(pos / 8) else {
                continue;
            };
            let bit = 1u8 << (pos % 8);
            if (bits >> shift) & 1 == 1 {
                *byte |= bit;
            } else {
                *byte &= !bit;
            }
        }
    }

    /// Read this signal's raw bit pattern out of `frame`.
    ///
    /// Bits beyond the end of `frame` read as zero.
    pub fn read_raw(&self, frame: &[u8]) -> u64 {
        let len = self.length as usize;
        let mut bits = 0u64;
        for (i, pos) in self.bit_positions().enumerate() {
            let shift = match self.order {
                BitOrder::LsbFirst => i,
                BitOrder::MsbFirst => len - 1 - i,
            };
            let set = frame
                .get(pos / 8)
                .is_some_and(|byte| (byte >> (pos % 8)) & 1 == 1);
            if set {
                bits |= 1u64 << shift;
            }
        }
        bits
    }

    /// Convert `value` and write it into `frame`.
    pub fn pack(
        &self,
        name: &str,
        value: f64,
        policy: RangePolicy,
        frame: &mut [u8],
    ) -> CodecResult<()> {
        let bits = self.to_raw(name, value, policy)?;
        self.write_raw(frame, bits);
        Ok(())
    }

    /// Extract the physical value of this signal from `frame`.
    pub fn unpack(&self, frame: &[u8]) -> f64 {
        self.to_physical(self.read_raw(frame))
    }
}

/// Iterator over the frame bit positions of a signal.
#[derive(Debug, Clone)]
pub struct BitPositions {
    order: BitOrder,
    next: usize,
    remaining: usize,
}

impl Iterator for BitPositions {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next;
        self.remaining -= 1;
        if self.remaining > 0 {
            self.next = self.order.next_bit_position(current);
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for BitPositions {}

/// Largest integer magnitude an f64 represents exactly.
const EXACT_INT_LIMIT: f64 = 9_007_199_254_740_992.0;

/// Round `value` to the decimal precision of `scale` and `offset`, so that
/// e.g. raw -120 at scale 0.1 yields exactly -12.0 instead of
/// -12.000000000000002.
fn snap_to_grid(value: f64, scale: f64, offset: f64) -> f64 {
    let places = decimal_places(scale).max(decimal_places(offset));
    if places == 0 || places > 15 {
        return value;
    }
    let factor = 10f64.powi(places as i32);
    let scaled = value * factor;
    if !scaled.is_finite() || scaled.abs() >= EXACT_INT_LIMIT {
        return value;
    }
    scaled.round() / factor
}

/// Digits after the decimal point in the shortest representation of `x`.
fn decimal_places(x: f64) -> usize {
    let repr = x.abs().to_string();
    match repr.split_once('.') {
        Some((_, fraction)) => fraction.len(),
        None => 0,
    }
}

/// Sign-extend an N-bit two's complement value to 64 bits.
fn sign_extend(value: u64, bit_length: usize) -> i64 {
    if bit_length >= 64 {
        return value as i64;
    }
    let sign_bit = 1u64 << (bit_length - 1);
    if value & sign_bit != 0 {
        (value | (!0u64 << bit_length)) as i64
    } else {
        value as i64
    }
}
