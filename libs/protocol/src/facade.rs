//! # Protocol Facade
//!
//! Couples one [`PacketPool`] with one [`RecyclePool`] and keeps an explicit
//! live count of queued packets. Connection workers push and recycle through
//! it; the embedding application drains it once per tick.
//!
//! The facade is an ordinary value. Bootstrap code builds it, wraps it in an
//! `Arc` and hands clones to the listener (see [`crate::global`] for an
//! optional process-wide slot).

use crate::pool::{PacketBox, PacketPool, PoolStrategy};
use crate::recycle::{RecyclePool, RecycleStats};
use codec::DEFAULT_SYNCWORD;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Facade construction parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// Marker that opens every frame on the wire
    pub syncword: u32,
    /// Packets preallocated and kept for reuse
    pub recycle_capacity: usize,
    /// Live packet count at which workers stop parsing
    pub max_packet_pool: usize,
    pub strategy: PoolStrategy,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            syncword: DEFAULT_SYNCWORD,
            recycle_capacity: 1024,
            max_packet_pool: 1024,
            strategy: PoolStrategy::Queue,
        }
    }
}

#[derive(Debug)]
pub struct ProtocolFacade {
    settings: ProtocolSettings,
    packet_pool: PacketPool,
    recycle_pool: RecyclePool,
    /// Packets pushed and not yet popped
    packet_count: AtomicUsize,
}

impl ProtocolFacade {
    pub fn new(settings: ProtocolSettings) -> Self {
        info!(
            syncword = %format!("{:#010X}", settings.syncword),
            strategy = %settings.strategy,
            recycle_capacity = settings.recycle_capacity,
            max_packet_pool = settings.max_packet_pool,
            "Protocol facade created"
        );
        Self {
            packet_pool: PacketPool::new(settings.strategy),
            recycle_pool: RecyclePool::new(settings.recycle_capacity),
            packet_count: AtomicUsize::new(0),
            settings,
        }
    }

    /// Shorthand for `Arc::new(ProtocolFacade::new(settings))`
    pub fn shared(settings: ProtocolSettings) -> Arc<Self> {
        Arc::new(Self::new(settings))
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    #[inline]
    pub fn syncword(&self) -> u32 {
        self.settings.syncword
    }

    /// Queue a packet for the consumer; a closed pool hands it back
    pub fn push(&self, packet: PacketBox) -> Result<(), PacketBox> {
        // counted before it becomes visible, so a racing pop never underflows
        self.packet_count.fetch_add(1, Ordering::AcqRel);
        self.packet_pool.push(packet).inspect_err(|_| {
            self.packet_count.fetch_sub(1, Ordering::AcqRel);
        })
    }

    pub fn pop(&self) -> Option<PacketBox> {
        let packet = self.packet_pool.pop()?;
        self.packet_count.fetch_sub(1, Ordering::AcqRel);
        Some(packet)
    }

    /// Live packet count
    #[inline]
    pub fn packet_pool_num(&self) -> usize {
        self.packet_count.load(Ordering::Acquire)
    }

    /// Free packets held by the recycle pool
    pub fn recycle_pool_num(&self) -> usize {
        self.recycle_pool.num()
    }

    /// True once the live count reaches `max_packet_pool`
    #[inline]
    pub fn is_at_capacity(&self) -> bool {
        self.packet_pool_num() >= self.settings.max_packet_pool
    }

    pub fn alloc_net_packet(&self) -> PacketBox {
        self.recycle_pool.alloc()
    }

    /// Recycled packet re-populated as a heartbeat stamped now
    pub fn alloc_heartbeat(&self) -> PacketBox {
        let mut packet = self.recycle_pool.alloc();
        packet.reuse_as_heartbeat(self.settings.syncword);
        packet
    }

    pub fn dealloc_net_packet(&self, packet: PacketBox, force_recycle: bool) {
        self.recycle_pool.dealloc(packet, force_recycle);
    }

    /// Pop the next packet into `held`, recycling whatever `held` had.
    ///
    /// Returns false and leaves `held` untouched when nothing is queued.
    pub fn pop_with_recycle(&self, held: &mut Option<PacketBox>) -> bool {
        let Some(packet) = self.pop() else {
            return false;
        };
        if let Some(previous) = held.replace(packet) {
            self.dealloc_net_packet(previous, false);
        }
        true
    }

    pub fn recycle_stats(&self) -> Arc<RecycleStats> {
        self.recycle_pool.stats()
    }

    pub fn strategy(&self) -> PoolStrategy {
        self.packet_pool.strategy()
    }

    /// Stop accepting packets and recycle everything still queued
    pub fn close(&self) -> usize {
        self.packet_pool.close();
        let mut drained = 0;
        while let Some(packet) = self.pop() {
            self.dealloc_net_packet(packet, false);
            drained += 1;
        }
        debug!(drained, "Protocol facade closed");
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.packet_pool.is_closed()
    }
}

impl Default for ProtocolFacade {
    fn default() -> Self {
        Self::new(ProtocolSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::build_data;

    fn settings(max_packet_pool: usize) -> ProtocolSettings {
        ProtocolSettings {
            recycle_capacity: 4,
            max_packet_pool,
            ..ProtocolSettings::default()
        }
    }

    fn data(session: u32) -> PacketBox {
        Box::new(build_data(DEFAULT_SYNCWORD, 1, session, vec![0xAB; 4]))
    }

    #[test]
    fn test_push_pop_tracks_live_count() {
        let facade = ProtocolFacade::new(settings(3));
        assert_eq!(facade.packet_pool_num(), 0);
        facade.push(data(1)).unwrap();
        facade.push(data(2)).unwrap();
        assert_eq!(facade.packet_pool_num(), 2);
        assert!(!facade.is_at_capacity());
        facade.push(data(3)).unwrap();
        assert!(facade.is_at_capacity());

        assert_eq!(facade.pop().unwrap().session_id, 1);
        assert_eq!(facade.packet_pool_num(), 2);
        assert!(!facade.is_at_capacity());
    }

    #[test]
    fn test_pop_with_recycle_replaces_held() {
        let facade = ProtocolFacade::new(settings(16));
        let mut held = None;
        assert!(!facade.pop_with_recycle(&mut held));
        assert!(held.is_none());

        let _ = facade.alloc_net_packet();
        assert_eq!(facade.recycle_pool_num(), 3);

        facade.push(data(10)).unwrap();
        facade.push(data(11)).unwrap();

        assert!(facade.pop_with_recycle(&mut held));
        assert_eq!(held.as_ref().unwrap().session_id, 10);
        assert_eq!(facade.recycle_pool_num(), 3);

        assert!(facade.pop_with_recycle(&mut held));
        assert_eq!(held.as_ref().unwrap().session_id, 11);
        // the first packet went back to the recycle pool
        assert_eq!(facade.recycle_pool_num(), 4);

        // empty queue keeps the latest packet
        assert!(!facade.pop_with_recycle(&mut held));
        assert_eq!(held.as_ref().unwrap().session_id, 11);
    }

    #[test]
    fn test_alloc_heartbeat_is_valid() {
        let facade = ProtocolFacade::new(ProtocolSettings {
            syncword: 0x0102_0304,
            ..settings(1)
        });
        let mut heartbeat = facade.alloc_heartbeat();
        assert!(heartbeat.is_heartbeat());
        assert_eq!(heartbeat.header.syncword(), 0x0102_0304);
        assert!(heartbeat.integrity_valid);
        assert!(heartbeat.check_integrity());
    }

    #[test]
    fn test_close_recycles_queue_and_rejects_pushes() {
        let facade = ProtocolFacade::new(settings(16));
        for _ in 0..4 {
            let packet = facade.alloc_net_packet();
            facade.push(packet).unwrap();
        }
        assert_eq!(facade.recycle_pool_num(), 0);

        assert_eq!(facade.close(), 4);
        assert_eq!(facade.packet_pool_num(), 0);
        assert_eq!(facade.recycle_pool_num(), 4);
        assert!(facade.is_closed());

        let rejected = facade.push(data(5)).unwrap_err();
        assert_eq!(rejected.session_id, 5);
        assert_eq!(facade.packet_pool_num(), 0);
    }
}
