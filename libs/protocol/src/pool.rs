//! # Packet Pool
//!
//! Container for parsed packets waiting for the consumer. The backing
//! discipline is picked once at construction:
//!
//! - [`PoolStrategy::Queue`]: lock-free multi-producer FIFO. Order is kept
//!   per producer; arrival order across producers is up to the scheduler.
//! - [`PoolStrategy::Stack`]: LIFO behind a single mutex, for
//!   single-producer/single-consumer reuse.
//! - [`PoolStrategy::Heap`]: oldest foot timestamp first, behind a mutex.
//!
//! The pool never enforces a capacity. Admission control belongs to the
//! connection workers, which look at the facade's live count.

use codec::Packet;
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Owned packet as it moves between workers, pools and the consumer
pub type PacketBox = Box<Packet>;

/// Backing discipline of a [`PacketPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStrategy {
    #[default]
    Queue,
    Stack,
    Heap,
}

impl fmt::Display for PoolStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolStrategy::Queue => "queue",
            PoolStrategy::Stack => "stack",
            PoolStrategy::Heap => "heap",
        };
        f.write_str(name)
    }
}

/// Heap slot ordered by (timestamp, arrival); the packet does not take part
struct HeapEntry {
    timestamp: u64,
    sequence: u64,
    packet: PacketBox,
}

impl HeapEntry {
    fn key(&self) -> (u64, u64) {
        (self.timestamp, self.sequence)
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

enum PoolInner {
    Queue(SegQueue<PacketBox>),
    Stack(Mutex<Vec<PacketBox>>),
    Heap {
        heap: Mutex<BinaryHeap<Reverse<HeapEntry>>>,
        sequence: AtomicU64,
    },
}

/// Packets awaiting consumption
pub struct PacketPool {
    inner: PoolInner,
    closed: AtomicBool,
}

impl PacketPool {
    /// Initial reservation for the mutex-backed strategies
    pub const INITIAL_CAPACITY: usize = 1024;

    pub fn new(strategy: PoolStrategy) -> Self {
        let inner = match strategy {
            PoolStrategy::Queue => PoolInner::Queue(SegQueue::new()),
            PoolStrategy::Stack => {
                PoolInner::Stack(Mutex::new(Vec::with_capacity(Self::INITIAL_CAPACITY)))
            }
            PoolStrategy::Heap => PoolInner::Heap {
                heap: Mutex::new(BinaryHeap::with_capacity(Self::INITIAL_CAPACITY)),
                sequence: AtomicU64::new(0),
            },
        };
        Self {
            inner,
            closed: AtomicBool::new(false),
        }
    }

    pub fn strategy(&self) -> PoolStrategy {
        match self.inner {
            PoolInner::Queue(_) => PoolStrategy::Queue,
            PoolInner::Stack(_) => PoolStrategy::Stack,
            PoolInner::Heap { .. } => PoolStrategy::Heap,
        }
    }

    /// Add a packet. Never blocks; hands the packet back if the pool is closed.
    pub fn push(&self, packet: PacketBox) -> Result<(), PacketBox> {
        if self.closed.load(Ordering::Acquire) {
            return Err(packet);
        }
        match &self.inner {
            PoolInner::Queue(queue) => queue.push(packet),
            PoolInner::Stack(stack) => stack.lock().push(packet),
            PoolInner::Heap { heap, sequence } => {
                let entry = HeapEntry {
                    timestamp: packet.timestamp(),
                    sequence: sequence.fetch_add(1, Ordering::Relaxed),
                    packet,
                };
                heap.lock().push(Reverse(entry));
            }
        }
        Ok(())
    }

    /// Take the next packet according to the strategy
    pub fn pop(&self) -> Option<PacketBox> {
        match &self.inner {
            PoolInner::Queue(queue) => queue.pop(),
            PoolInner::Stack(stack) => stack.lock().pop(),
            PoolInner::Heap { heap, .. } => heap.lock().pop().map(|Reverse(entry)| entry.packet),
        }
    }

    /// Number of packets held; a snapshot while producers are active
    pub fn num(&self) -> usize {
        match &self.inner {
            PoolInner::Queue(queue) => queue.len(),
            PoolInner::Stack(stack) => stack.lock().len(),
            PoolInner::Heap { heap, .. } => heap.lock().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num() == 0
    }

    /// Reject all further pushes. Packets already held can still be popped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketPool")
            .field("strategy", &self.strategy())
            .field("num", &self.num())
            .field("closed", &self.is_closed())
            .finish()
    }
}
