//! Network Error Types
//!
//! Failures of the listener, connection workers and client. Inside worker
//! threads these are logged, never propagated; they surface to callers only
//! from construction (`create`, `connect`) and from the client send path.

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    /// The listening socket could not be created, bound or put into listen mode
    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The OS refused to start a worker thread
    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        name: String,
        source: std::io::Error,
    },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    /// Connection management errors
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
    },

    /// The reaper is shutting down and no longer takes workers
    #[error("Connection reaper is not running")]
    ReaperNotRunning,

    /// A worker thread exited before finishing its init step
    #[error("{component} failed to initialise")]
    InitFailed { component: String },
}

pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    pub fn bind(addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Bind { addr, source }
    }

    pub fn thread_spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::ThreadSpawn {
            name: name.into(),
            source,
        }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    pub fn connection(message: impl Into<String>, remote_addr: Option<SocketAddr>) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
        }
    }

    pub fn init_failed(component: impl Into<String>) -> Self {
        Self::InitFailed {
            component: component.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_names_address() {
        let addr: SocketAddr = "127.0.0.1:3717".parse().unwrap();
        let err = NetworkError::bind(
            addr,
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert!(err.to_string().contains("127.0.0.1:3717"));
        assert!(matches!(err, NetworkError::Bind { .. }));
    }

    #[test]
    fn test_connection_error_display() {
        let err = NetworkError::connection("peer reset", None);
        assert_eq!(err.to_string(), "Connection error: peer reset (remote: None)");
    }
}
