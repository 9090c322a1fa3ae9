//! # Frame Builder
//!
//! Construction of outbound frames and their serialisation. `encode` writes
//! header, body (data frames only) and foot contiguously, which is exactly
//! the layout [`parse`](crate::parse) reads back.

use crate::packet::{Packet, PacketFoot, PacketHeader};
use zerocopy::AsBytes;

/// Bytes `packet` occupies on the wire
pub fn encoded_len(packet: &Packet) -> usize {
    PacketHeader::SIZE + packet.wire_body().len() + PacketFoot::SIZE
}

/// Append the wire form of `packet` to `out`
pub fn encode_into(packet: &Packet, out: &mut Vec<u8>) {
    out.reserve(encoded_len(packet));
    out.extend_from_slice(packet.header.as_bytes());
    out.extend_from_slice(packet.wire_body());
    out.extend_from_slice(packet.foot.as_bytes());
}

/// Serialise `packet` into a new buffer
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(packet));
    encode_into(packet, &mut out);
    out
}

/// Keepalive frame with session 0, stamped now
pub fn create_heartbeat(syncword: u32) -> Packet {
    build_heartbeat(syncword, 0, 0)
}

/// Keepalive frame carrying a session id and caller-supplied extra data
pub fn build_heartbeat(syncword: u32, session_id: u32, extra: u32) -> Packet {
    let mut packet = Packet {
        header: PacketHeader::new(syncword),
        ..Packet::default()
    };
    packet.header.set_session(session_id, extra);
    packet.foot.set_now();
    packet.seal();
    packet
}

/// Application frame stamped now.
///
/// `type_id` must be nonzero; a zero id makes this a heartbeat and the body
/// is not sent.
pub fn build_data(syncword: u32, type_id: u16, session_id: u32, body: Vec<u8>) -> Packet {
    let mut packet = Packet {
        header: PacketHeader::new(syncword),
        body,
        ..Packet::default()
    };
    packet.header.type_id.set(type_id);
    packet.header.set_session(session_id, 0);
    packet.foot.set_now();
    packet.seal();
    packet
}
