//! DBC message model and bit-accurate signal codec.
//!
//! - `SignalLayout` / `BitOrder`: bit geometry and physical <-> raw scaling
//! - `MessageCodec`: packs/unpacks a full (optionally multiplexed) frame
//! - `Database`: codecs keyed by id, plus which node sends/receives what
//!
//! The textual DBC parser is an external collaborator: it produces a
//! [`DatabaseDef`], which this crate validates and turns into a [`Database`].

pub mod codec;
pub mod database;
pub mod def;
pub mod error;
pub mod layout;
pub mod signal;

pub use codec::{DecodedMessage, DecodedSignal, MAX_FRAME_LENGTH, MessageCodec, SignalValues};
pub use database::{Database, DatabaseStats};
pub use def::{DatabaseDef, MessageDef, SendType};
pub use error::{CodecError, CodecResult, DatabaseError, DatabaseResult};
pub use layout::{BitOrder, Multiplexing, RangePolicy, SignalLayout};
pub use signal::Signal;
