//! Recycle pool for packet objects
//!
//! Keeps up to `capacity` boxed packets around so the receive path can reuse
//! them instead of allocating per frame. Exhaustion never blocks: `alloc`
//! falls back to a fresh allocation and `dealloc` drops what does not fit.

use crate::pool::PacketBox;
use codec::Packet;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Recycle pool statistics
#[derive(Debug, Default)]
pub struct RecycleStats {
    /// Packets created because no free slot was available (or at preallocation)
    pub allocations: AtomicU64,
    /// `alloc` calls served from the free list
    pub hits: AtomicU64,
    /// `alloc` calls that had to allocate
    pub misses: AtomicU64,
    /// Packets returned to the free list
    pub recycled: AtomicU64,
    /// Packets dropped on `dealloc` (forced, or pool full)
    pub drops: AtomicU64,
}

impl RecycleStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            return 0.0;
        }

        (hits as f64 / total as f64) * 100.0
    }
}

/// Bounded free list of reusable packets
#[derive(Debug)]
pub struct RecyclePool {
    free: Mutex<Vec<PacketBox>>,
    capacity: usize,
    stats: Arc<RecycleStats>,
}

impl RecyclePool {
    /// Create a pool with `capacity` packets already allocated
    pub fn new(capacity: usize) -> Self {
        let stats = Arc::new(RecycleStats::new());
        let free: Vec<PacketBox> = (0..capacity).map(|_| Box::<Packet>::default()).collect();
        stats.allocations.fetch_add(capacity as u64, Ordering::Relaxed);
        Self {
            free: Mutex::new(free),
            capacity,
            stats,
        }
    }

    /// Take a packet with its header and foot reset
    pub fn alloc(&self) -> PacketBox {
        let recycled = self.free.lock().pop();
        let mut packet = match recycled {
            Some(packet) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                packet
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.stats.allocations.fetch_add(1, Ordering::Relaxed);
                Box::<Packet>::default()
            }
        };
        packet.on_alloc();
        packet
    }

    /// Reset `packet` and keep it for reuse.
    ///
    /// The packet is dropped instead when `force_recycle` is set or the pool
    /// already holds `capacity` packets.
    pub fn dealloc(&self, mut packet: PacketBox, force_recycle: bool) {
        packet.on_dealloc();
        if force_recycle {
            self.stats.drops.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(packet);
            self.stats.recycled.fetch_add(1, Ordering::Relaxed);
        } else {
            drop(free);
            self.stats.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Free packets currently resident
    pub fn num(&self) -> usize {
        self.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> Arc<RecycleStats> {
        Arc::clone(&self.stats)
    }
}
