//! # Servo Wire Codec
//!
//! Stateless framing for the servo ingestion protocol:
//! - Packed header / body / foot layout with a leading syncword
//! - Single-byte XOR fastcode for cheap integrity checks
//! - Decoding from arbitrary stream offsets (resynchronises on the syncword)
//! - Heartbeat and data frame construction, serialisation
//!
//! ## Architecture Role
//!
//! ```text
//! socket bytes → [codec::decode_into] → Packet → protocol pools → consumer
//!                     ↑
//!          [codec::encode] ← client / heartbeat sender
//! ```

pub mod builder;
pub mod constants;
pub mod error;
pub mod packet;
pub mod parser;

pub use builder::{build_data, build_heartbeat, create_heartbeat, encode, encode_into, encoded_len};
pub use constants::*;
pub use error::{FrameError, FrameResult, FrameSection};
pub use packet::{unix_timestamp_ms, xor_bytes, Packet, PacketFoot, PacketHeader};
pub use parser::{decode_into, find_syncword, parse};
