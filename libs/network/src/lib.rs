//! # Servo Network
//!
//! Thread-per-connection TCP ingestion:
//! - [`ListenerWorker`]: accept thread, one per listening port
//! - [`ConnectionReaper`]: owns all connections, retires dead ones
//! - [`ConnectionWorker`]: one thread per socket, decodes frames into the
//!   [`protocol::ProtocolFacade`]
//! - [`ServoClient`]: blocking sender for tools and tests
//!
//! ## Architecture Role
//!
//! ```text
//! ListenerWorker ──accept──→ ConnectionWorker ──decode/push──→ ProtocolFacade
//!        │                          ↑
//!        └──safe_hold_thread──→ ConnectionReaper (scan → stop, drain → join)
//! ```
//!
//! Every thread runs the same lifecycle (`Constructed → Init → Running →
//! Exiting → Exited`) and exposes an idempotent `kill_thread`.

pub mod client;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod listener;
pub mod readiness;
pub mod reaper;

pub use client::ServoClient;
pub use connection::{ConnectionSettings, ConnectionStats, ConnectionWorker};
pub use error::{NetworkError, Result};
pub use lifecycle::{KillGate, Lifecycle, LifecycleStep, Signal};
pub use listener::{ListenerSettings, ListenerWorker};
pub use readiness::{peer_hung_up, wait_readable};
pub use reaper::ConnectionReaper;
