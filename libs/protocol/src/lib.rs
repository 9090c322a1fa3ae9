//! # Servo Protocol Pools
//!
//! Moves parsed packets from connection workers to the consumer:
//! - [`PacketPool`]: queued packets, Queue / Stack / Heap discipline
//! - [`RecyclePool`]: bounded free list of packet objects
//! - [`ProtocolFacade`]: both pools behind one API plus a live count used
//!   for backpressure
//!
//! ## Architecture Role
//!
//! ```text
//! ConnectionWorker ──push──→ ProtocolFacade ──pop_with_recycle──→ consumer tick
//!        ↑                      │    ↑                                │
//!        └──alloc/dealloc── RecyclePool ←────────── recycled packet ──┘
//! ```

pub mod error;
pub mod facade;
pub mod global;
pub mod pool;
pub mod recycle;

pub use error::{ProtocolError, Result};
pub use facade::{ProtocolFacade, ProtocolSettings};
pub use global::{global, global_or_init, install_global};
pub use pool::{PacketBox, PacketPool, PoolStrategy};
pub use recycle::{RecyclePool, RecycleStats};
