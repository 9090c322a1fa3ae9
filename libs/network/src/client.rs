//! Blocking client for the servo wire protocol
//!
//! Counterpart of the listener for tools and tests: connects, builds frames
//! with the configured syncword and writes them to the socket.

use crate::error::{NetworkError, Result};
use codec::{build_data, build_heartbeat, encode_into, Packet};
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use tracing::{debug, trace};

#[derive(Debug)]
pub struct ServoClient {
    stream: TcpStream,
    peer: SocketAddr,
    syncword: u32,
    /// Reused encode buffer
    scratch: Vec<u8>,
}

impl ServoClient {
    pub fn connect(addr: impl ToSocketAddrs, syncword: u32) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| NetworkError::io("connect to servo listener", e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| NetworkError::io("set TCP_NODELAY", e))?;
        let peer = stream
            .peer_addr()
            .map_err(|e| NetworkError::io("read peer address", e))?;
        debug!(peer = %peer, "Client connected");
        Ok(Self {
            stream,
            peer,
            syncword,
            scratch: Vec::with_capacity(256),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn syncword(&self) -> u32 {
        self.syncword
    }

    /// Send a heartbeat stamped now
    pub fn send_heartbeat(&mut self, session_id: u32, extra: u32) -> Result<()> {
        let packet = build_heartbeat(self.syncword, session_id, extra);
        self.send_packet(&packet)
    }

    /// Send an application frame stamped now
    pub fn send_data(&mut self, type_id: u16, session_id: u32, body: Vec<u8>) -> Result<()> {
        let packet = build_data(self.syncword, type_id, session_id, body);
        self.send_packet(&packet)
    }

    /// Send `packet` as is; it is not re-sealed
    pub fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        encode_into(packet, &mut scratch);
        let result = self.send_raw(&scratch);
        self.scratch = scratch;
        result
    }

    /// Write raw bytes, framing or not
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        trace!(peer = %self.peer, bytes = bytes.len(), "Sending");
        self.stream
            .write_all(bytes)
            .and_then(|()| self.stream.flush())
            .map_err(|e| NetworkError::io("write to servo listener", e))
    }

    /// Close both directions of the connection
    pub fn shutdown(&self) -> Result<()> {
        self.stream
            .shutdown(Shutdown::Both)
            .map_err(|e| NetworkError::io("shut down client socket", e))
    }
}
