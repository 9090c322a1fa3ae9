//! # Frame Types
//!
//! The header and foot structs ARE the wire representation: `repr(C)` with
//! single-byte-aligned little-endian fields, so `as_bytes()` yields exactly
//! the bytes sent on the socket and no padding can sneak in.
//!
//! ```text
//! ┌──────────────────────┬──────────────────┬──────────────────────┐
//! │ PacketHeader (16 B)  │ body (body_size) │ PacketFoot (8 B[+32])│
//! │ syncword version     │ absent when      │ [signature] timestamp│
//! │ fastcode type_id     │ type_id == 0     │                      │
//! │ body_size reserved   │                  │                      │
//! └──────────────────────┴──────────────────┴──────────────────────┘
//! ```

use crate::constants::{
    DEFAULT_SYNCWORD, EXTRA_DATA_MAX, FOOT_SIZE, HEADER_SIZE, HEARTBEAT_TYPE_ID, PROTOCOL_VERSION,
    SESSION_ID_BITS, SESSION_ID_MASK,
};
#[cfg(feature = "signature")]
use crate::constants::SIGNATURE_LEN;
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// XOR of every byte in `bytes`
#[inline]
pub fn xor_bytes(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Milliseconds since the Unix epoch
pub fn unix_timestamp_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Frame header (16 bytes on the wire)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
pub struct PacketHeader {
    pub syncword: U32<LittleEndian>,
    pub version: u8,
    /// XOR of every other byte of the frame
    pub fastcode: u8,
    pub type_id: U16<LittleEndian>,
    pub body_size: U32<LittleEndian>,
    /// Session id in the low 22 bits, auxiliary data above
    pub reserved: U32<LittleEndian>,
}

const _: () = assert!(std::mem::size_of::<PacketHeader>() == HEADER_SIZE);

impl PacketHeader {
    pub const SIZE: usize = HEADER_SIZE;

    pub fn new(syncword: u32) -> Self {
        Self {
            syncword: U32::new(syncword),
            version: PROTOCOL_VERSION,
            fastcode: 0,
            type_id: U16::new(HEARTBEAT_TYPE_ID),
            body_size: U32::new(0),
            reserved: U32::new(0),
        }
    }

    #[inline]
    pub fn syncword(&self) -> u32 {
        self.syncword.get()
    }

    #[inline]
    pub fn type_id(&self) -> u16 {
        self.type_id.get()
    }

    #[inline]
    pub fn body_size(&self) -> u32 {
        self.body_size.get()
    }

    #[inline]
    pub fn reserved(&self) -> u32 {
        self.reserved.get()
    }

    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.type_id() == HEARTBEAT_TYPE_ID
    }

    /// Session id carried in the low bits of `reserved`
    #[inline]
    pub fn session_id(&self) -> u32 {
        self.reserved() & SESSION_ID_MASK
    }

    /// Auxiliary data carried above the session id
    #[inline]
    pub fn extra_data(&self) -> u32 {
        self.reserved() >> SESSION_ID_BITS
    }

    /// Compose `reserved` from a session id and auxiliary data.
    ///
    /// Both values are truncated to their bit widths.
    pub fn set_session(&mut self, session_id: u32, extra: u32) {
        let value = ((extra & EXTRA_DATA_MAX) << SESSION_ID_BITS) | (session_id & SESSION_ID_MASK);
        self.reserved.set(value);
    }

    /// XOR over all 16 header bytes, fastcode included
    #[inline]
    pub fn xor(&self) -> u8 {
        xor_bytes(self.as_bytes())
    }

    /// Clear everything except the syncword
    pub fn reset(&mut self) {
        self.version = PROTOCOL_VERSION;
        self.fastcode = 0;
        self.type_id.set(HEARTBEAT_TYPE_ID);
        self.body_size.set(0);
        self.reserved.set(0);
    }
}

/// Frame foot: send timestamp, preceded by a signature when the
/// `signature` feature is enabled
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
pub struct PacketFoot {
    #[cfg(feature = "signature")]
    pub signature: [u8; SIGNATURE_LEN],
    /// Milliseconds since the Unix epoch
    pub timestamp: U64<LittleEndian>,
}

const _: () = assert!(std::mem::size_of::<PacketFoot>() == FOOT_SIZE);

impl PacketFoot {
    pub const SIZE: usize = FOOT_SIZE;

    pub fn with_timestamp(timestamp_ms: u64) -> Self {
        let mut foot = Self::new_zeroed();
        foot.timestamp.set(timestamp_ms);
        foot
    }

    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp.get()
    }

    /// Stamp with the current time (and clear the signature)
    pub fn set_now(&mut self) {
        *self = Self::with_timestamp(unix_timestamp_ms());
    }

    #[inline]
    pub fn xor(&self) -> u8 {
        xor_bytes(self.as_bytes())
    }

    pub fn reset(&mut self) {
        *self = Self::new_zeroed();
    }
}

/// A decoded (or locally built) frame plus the metadata derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    /// Owned body; empty for heartbeats
    pub body: Vec<u8>,
    pub foot: PacketFoot,
    pub session_id: u32,
    pub integrity_valid: bool,
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            header: PacketHeader::new(DEFAULT_SYNCWORD),
            body: Vec::new(),
            foot: PacketFoot::new_zeroed(),
            session_id: 0,
            integrity_valid: false,
        }
    }
}

impl Packet {
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.header.is_heartbeat()
    }

    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.foot.timestamp()
    }

    /// Body bytes that belong on the wire (none for heartbeats)
    #[inline]
    pub fn wire_body(&self) -> &[u8] {
        if self.is_heartbeat() {
            &[]
        } else {
            &self.body
        }
    }

    /// Checksum the frame should carry given its current contents
    pub fn compute_fastcode(&self) -> u8 {
        // The header XOR includes the fastcode byte itself, cancel it out
        self.header.xor() ^ self.header.fastcode ^ xor_bytes(self.wire_body()) ^ self.foot.xor()
    }

    /// Re-derive `integrity_valid` from the current contents
    pub fn check_integrity(&mut self) -> bool {
        self.integrity_valid = self.compute_fastcode() == self.header.fastcode;
        self.integrity_valid
    }

    /// Store the checksum and derived fields after building a frame by hand
    pub fn seal(&mut self) {
        if !self.is_heartbeat() {
            self.header.body_size.set(self.body.len() as u32);
        }
        self.header.fastcode = self.compute_fastcode();
        self.session_id = self.header.session_id();
        self.integrity_valid = true;
    }

    /// Called when the packet leaves a recycle pool
    pub fn on_alloc(&mut self) {
        self.header.reset();
        self.foot.reset();
    }

    /// Called before the packet is returned to a recycle pool
    pub fn on_dealloc(&mut self) {
        self.session_id = 0;
        self.integrity_valid = false;
        self.body = Vec::new();
        self.header.body_size.set(0);
    }

    /// Re-populate in place as a heartbeat stamped now
    pub fn reuse_as_heartbeat(&mut self, syncword: u32) {
        self.header.reset();
        self.header.syncword.set(syncword);
        self.body = Vec::new();
        self.foot.set_now();
        self.seal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_packed_little_endian() {
        let mut header = PacketHeader::new(DEFAULT_SYNCWORD);
        header.type_id.set(0x0102);
        header.body_size.set(0x0304_0506);
        header.set_session(7, 1);

        let bytes = header.as_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &[0xA2, 0xF1, 0xB7, 0xE6]);
        assert_eq!(&bytes[6..8], &[0x02, 0x01]);
        assert_eq!(&bytes[8..12], &[0x06, 0x05, 0x04, 0x03]);
        assert_eq!(&bytes[12..16], &(7u32 | (1 << 22)).to_le_bytes());
    }

    #[test]
    fn test_session_masking() {
        let mut header = PacketHeader::new(DEFAULT_SYNCWORD);
        header.set_session(SESSION_ID_MASK + 5, 3);
        assert_eq!(header.session_id(), 4);
        assert_eq!(header.extra_data(), 3);

        header.reserved.set(u32::MAX);
        assert_eq!(header.session_id(), SESSION_ID_MASK);
        assert_eq!(header.extra_data(), EXTRA_DATA_MAX);
    }

    #[test]
    fn test_seal_sets_checksum_and_session() {
        let mut packet = Packet::default();
        packet.header.type_id.set(9);
        packet.header.set_session(42, 0);
        packet.body = vec![1, 2, 3, 4];
        packet.foot = PacketFoot::with_timestamp(1_000);
        packet.seal();

        assert_eq!(packet.header.body_size(), 4);
        assert_eq!(packet.session_id, 42);
        assert!(packet.integrity_valid);
        assert!(packet.check_integrity());

        packet.body[0] ^= 0xFF;
        assert!(!packet.check_integrity());
    }

    #[test]
    fn test_heartbeat_checksum_ignores_stale_body() {
        let mut packet = Packet::default();
        packet.foot = PacketFoot::with_timestamp(77);
        packet.seal();
        let fastcode = packet.header.fastcode;

        // A heartbeat carries no body on the wire, leftovers must not matter
        packet.body = vec![0xAA; 3];
        assert_eq!(packet.compute_fastcode(), fastcode);
    }

    #[test]
    fn test_dealloc_then_alloc_resets_state() {
        let mut packet = Packet::default();
        packet.header.type_id.set(3);
        packet.header.set_session(11, 2);
        packet.body = vec![5; 16];
        packet.foot = PacketFoot::with_timestamp(123);
        packet.seal();

        packet.on_dealloc();
        assert!(packet.body.is_empty());
        assert_eq!(packet.body.capacity(), 0);
        assert_eq!(packet.header.body_size(), 0);
        assert!(!packet.integrity_valid);
        assert_eq!(packet.session_id, 0);

        packet.on_alloc();
        assert_eq!(packet.header.type_id(), 0);
        assert_eq!(packet.header.reserved(), 0);
        assert_eq!(packet.header.fastcode, 0);
        assert_eq!(packet.timestamp(), 0);
        // syncword survives so the packet can be reused on the same stream
        assert_eq!(packet.header.syncword(), DEFAULT_SYNCWORD);
    }

    #[test]
    fn test_reuse_as_heartbeat() {
        let mut packet = Packet::default();
        packet.header.type_id.set(5);
        packet.body = vec![1; 8];
        packet.reuse_as_heartbeat(0x1122_3344);

        assert!(packet.is_heartbeat());
        assert!(packet.body.is_empty());
        assert_eq!(packet.header.syncword(), 0x1122_3344);
        assert!(packet.timestamp() > 0);
        assert!(packet.check_integrity());
    }
}
