//! # Frame Parser
//!
//! Locates frames in an unstructured byte stream by scanning for the syncword,
//! then reads header, body and foot in order while folding every byte into a
//! running XOR. A frame whose bytes (fastcode included) XOR to zero is marked
//! `integrity_valid`.
//!
//! On any failure the whole input counts as consumed: the caller drops it, or
//! holds the tail starting at [`FrameError::partial_frame_offset`], and waits
//! for more data.

use crate::error::{FrameError, FrameResult, FrameSection};
use crate::packet::{xor_bytes, Packet, PacketFoot, PacketHeader};
use memchr::memmem;
use tracing::trace;
use zerocopy::FromBytes;

/// Offset of the first syncword in `buffer`
pub fn find_syncword(buffer: &[u8], syncword: u32) -> Option<usize> {
    memmem::find(buffer, &syncword.to_le_bytes())
}

/// Parse the first frame in `buffer`, allocating a fresh packet.
///
/// Returns the packet and the number of bytes consumed (the offset just past
/// its foot).
pub fn parse(buffer: &[u8], syncword: u32) -> FrameResult<(Packet, usize)> {
    let mut packet = Packet::default();
    let consumed = decode_into(&mut packet, buffer, syncword)?;
    Ok((packet, consumed))
}

/// Parse the first frame in `buffer` into an existing (typically recycled)
/// packet, reusing its body allocation.
pub fn decode_into(packet: &mut Packet, buffer: &[u8], syncword: u32) -> FrameResult<usize> {
    packet.session_id = 0;
    packet.integrity_valid = false;

    let frame_offset = find_syncword(buffer, syncword)
        .ok_or_else(|| FrameError::syncword_not_found(buffer.len()))?;
    if frame_offset > 0 {
        trace!(skipped = frame_offset, "Resynchronised on syncword");
    }

    let frame = &buffer[frame_offset..];
    let mut need = PacketHeader::SIZE;
    let header = PacketHeader::read_from_prefix(frame).ok_or_else(|| {
        FrameError::buffer_too_short(FrameSection::Header, frame_offset, need, frame.len())
    })?;
    let mut offset = PacketHeader::SIZE;
    let mut fastcode = header.xor();
    packet.header = header;

    if header.is_heartbeat() {
        packet.body.clear();
    } else {
        let body_size = header.body_size() as usize;
        need = PacketHeader::SIZE.saturating_add(body_size);
        let body = frame.get(offset..need).ok_or_else(|| {
            FrameError::buffer_too_short(
                FrameSection::Body,
                frame_offset,
                need.saturating_add(PacketFoot::SIZE),
                frame.len(),
            )
        })?;
        packet.body.clear();
        packet.body.extend_from_slice(body);
        fastcode ^= xor_bytes(body);
        offset = need;
    }

    need = offset + PacketFoot::SIZE;
    let foot = PacketFoot::read_from_prefix(&frame[offset..]).ok_or_else(|| {
        FrameError::buffer_too_short(FrameSection::Foot, frame_offset, need, frame.len())
    })?;
    fastcode ^= foot.xor();
    packet.foot = foot;

    packet.integrity_valid = fastcode == 0;
    packet.session_id = header.session_id();

    Ok(frame_offset + need)
}
