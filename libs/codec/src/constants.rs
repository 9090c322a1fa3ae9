//! # Wire Constants
//!
//! Values that define the frame layout. They are shared by every peer speaking
//! the protocol and must not change without a version bump.

/// Default frame marker. Sent little-endian, so the bytes on the wire are
/// `A2 F1 B7 E6`.
pub const DEFAULT_SYNCWORD: u32 = 0xE6B7_F1A2;

/// Version written into frames built by this crate
pub const PROTOCOL_VERSION: u8 = 0;

/// `type_id` reserved for heartbeat/control frames (no body)
pub const HEARTBEAT_TYPE_ID: u16 = 0;

/// Width of the session id stored in the low bits of `reserved`
pub const SESSION_ID_BITS: u32 = 22;

/// Mask extracting the session id from `reserved`
pub const SESSION_ID_MASK: u32 = (1 << SESSION_ID_BITS) - 1;

/// Largest value the auxiliary bits above the session id can carry
pub const EXTRA_DATA_MAX: u32 = u32::MAX >> SESSION_ID_BITS;

/// Size of the optional foot signature
pub const SIGNATURE_LEN: usize = 32;

/// Packed header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Packed foot size in bytes
#[cfg(not(feature = "signature"))]
pub const FOOT_SIZE: usize = 8;

/// Packed foot size in bytes
#[cfg(feature = "signature")]
pub const FOOT_SIZE: usize = 8 + SIGNATURE_LEN;

/// Smallest possible frame: a heartbeat
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + FOOT_SIZE;
