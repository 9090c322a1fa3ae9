//! # Connection Worker
//!
//! One OS thread per accepted socket. The thread waits for readability,
//! reads into a bounded receive buffer, decodes frames with [`codec`] and
//! pushes the valid ones into the shared [`ProtocolFacade`].
//!
//! ## Receive buffer
//!
//! The buffer holds `max_received_bytes + 1` bytes. Bytes that have not been
//! parsed yet (a frame split across reads, or frames held back by
//! backpressure) stay at the front of the buffer for the next iteration. If a
//! read leaves more than `max_received_bytes` held, everything buffered is
//! discarded with a warning.
//!
//! ## Shutdown
//!
//! A socket error or EOF does not end the thread. It marks the connection as
//! disconnected and idles until the reaper notices and calls
//! [`stop`](ConnectionWorker::stop). `stop` raises the stop flag and shuts the
//! socket down; [`kill_thread`](ConnectionWorker::kill_thread) also joins.
//! While backpressure pauses reads, the socket state is polled instead so a
//! hang-up is still noticed.

use crate::error::{NetworkError, Result};
use crate::lifecycle::{KillGate, Lifecycle, LifecycleStep, Signal};
use crate::readiness::{peer_hung_up, wait_readable};
use codec::FrameError;
use parking_lot::Mutex;
use protocol::ProtocolFacade;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Bytes of a syncword; a partial marker at the end of the buffer is kept
const SYNCWORD_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Receive buffer capacity
    pub max_received_bytes: usize,
    /// Upper bound on a single readiness wait
    pub poll_interval: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_received_bytes: 1024 * 1024,
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Per-connection counters
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub bytes_received: AtomicU64,
    pub frames_accepted: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub overflows: AtomicU64,
}

/// State shared between the handle and the worker thread
struct ConnectionShared {
    rank: u64,
    peer: SocketAddr,
    stream: TcpStream,
    facade: Arc<ProtocolFacade>,
    settings: ConnectionSettings,
    lifecycle: Lifecycle,
    stop: Signal,
    stopped: AtomicBool,
    connected: AtomicBool,
    stats: ConnectionStats,
}

/// Handle to a connection thread
pub struct ConnectionWorker {
    shared: Arc<ConnectionShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    kill: KillGate,
}

impl ConnectionWorker {
    /// Take ownership of an accepted socket and start its worker thread
    pub fn create(
        stream: TcpStream,
        peer: SocketAddr,
        rank: u64,
        facade: Arc<ProtocolFacade>,
        settings: ConnectionSettings,
    ) -> Result<Arc<Self>> {
        let shared = Arc::new(ConnectionShared {
            rank,
            peer,
            stream,
            facade,
            settings,
            lifecycle: Lifecycle::new(),
            stop: Signal::new(),
            stopped: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            stats: ConnectionStats::default(),
        });

        let name = format!("servo-conn-{rank}");
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || thread_shared.run())
            .map_err(|e| NetworkError::thread_spawn(name, e))?;

        Ok(Arc::new(Self {
            shared,
            handle: Mutex::new(Some(handle)),
            kill: KillGate::new(),
        }))
    }

    pub fn rank_id(&self) -> u64 {
        self.shared.rank
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer
    }

    pub fn lifecycle_step(&self) -> LifecycleStep {
        self.shared.lifecycle.get()
    }

    pub fn is_exited(&self) -> bool {
        self.shared.lifecycle.is_exited()
    }

    /// False once the peer went away or the thread finished
    pub fn is_socket_connection(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire) && !self.is_exited()
    }

    pub fn bytes_received(&self) -> u64 {
        self.shared.stats.bytes_received.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.shared.stats
    }

    pub fn is_kill_called(&self) -> bool {
        self.kill.is_called()
    }

    pub fn is_kill_done(&self) -> bool {
        self.kill.is_done()
    }

    /// Ask the thread to finish and shut the socket down. Does not wait.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(rank = self.shared.rank, peer = %self.shared.peer, "Stopping connection");
        self.shared.stop.raise();
        if let Err(e) = self.shared.stream.shutdown(Shutdown::Both) {
            // Already gone when the peer closed first
            trace!(rank = self.shared.rank, error = %e, "Socket shutdown");
        }
    }

    /// Stop, join the thread and release its handle.
    ///
    /// Safe to call concurrently; every caller returns true once the thread
    /// has been joined.
    pub fn kill_thread(&self) -> bool {
        self.kill.kill(|| {
            self.stop();
            let handle = self.handle.lock().take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!(rank = self.shared.rank, "Connection thread panicked");
                    self.shared.lifecycle.set(LifecycleStep::Exited);
                }
            }
            debug!(rank = self.shared.rank, "Connection thread joined");
        })
    }
}

impl Drop for ConnectionWorker {
    fn drop(&mut self) {
        self.kill_thread();
    }
}

impl std::fmt::Debug for ConnectionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWorker")
            .field("rank", &self.shared.rank)
            .field("peer", &self.shared.peer)
            .field("step", &self.lifecycle_step())
            .field("connected", &self.shared.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl ConnectionShared {
    fn run(&self) {
        self.lifecycle.set(LifecycleStep::Init);
        if let Err(e) = self.init() {
            error!(rank = self.rank, peer = %self.peer, error = %e, "Connection init failed");
            self.connected.store(false, Ordering::Release);
        } else {
            self.lifecycle.set(LifecycleStep::Running);
            info!(rank = self.rank, peer = %self.peer, "Connection running");
            self.receive_loop();
        }

        self.lifecycle.set(LifecycleStep::Exiting);
        debug!(
            rank = self.rank,
            bytes = self.stats.bytes_received.load(Ordering::Relaxed),
            frames = self.stats.frames_accepted.load(Ordering::Relaxed),
            "Connection exiting"
        );
        self.lifecycle.set(LifecycleStep::Exited);
    }

    fn init(&self) -> io::Result<()> {
        self.stream.set_nonblocking(true)?;
        self.stream.set_nodelay(true)?;
        Ok(())
    }

    fn receive_loop(&self) {
        let capacity = self.settings.max_received_bytes;
        let poll_interval = self.settings.poll_interval;
        let mut buffer = vec![0u8; capacity + 1];
        let mut held = 0usize;
        let mut stalled = false;

        while !self.stop.is_raised() {
            if !self.connected.load(Ordering::Acquire) {
                self.stop.wait(poll_interval);
                continue;
            }

            if self.facade.is_at_capacity() {
                trace!(rank = self.rank, pool_len = self.facade.packet_pool_num(), "Backpressure");
                // not reading, so EOF would go unseen
                if !self.peer_closed_during_backpressure() {
                    self.stop.wait(poll_interval);
                }
                continue;
            }

            if stalled {
                (held, stalled) = self.parse_held(&mut buffer, held);
                continue;
            }

            match wait_readable(&self.stream, poll_interval) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(rank = self.rank, error = %e, "Readiness wait failed");
                    self.stop.wait(poll_interval);
                    continue;
                }
            }

            match (&self.stream).read(&mut buffer[held..]) {
                Ok(0) => {
                    info!(rank = self.rank, peer = %self.peer, "Peer closed connection");
                    self.connected.store(false, Ordering::Release);
                }
                Ok(read) => {
                    self.stats.bytes_received.fetch_add(read as u64, Ordering::Relaxed);
                    held += read;
                    if held > capacity {
                        warn!(
                            rank = self.rank,
                            bytes = held,
                            capacity,
                            "Receive buffer overflow, discarding buffered bytes"
                        );
                        self.stats.overflows.fetch_add(1, Ordering::Relaxed);
                        held = 0;
                        continue;
                    }
                    (held, stalled) = self.parse_held(&mut buffer, held);
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {}
                Err(e) => {
                    warn!(rank = self.rank, peer = %self.peer, error = %e, "Socket read failed");
                    self.connected.store(false, Ordering::Release);
                }
            }
        }
    }

    /// Mark the connection gone if the peer hung up while reads are paused.
    /// Bytes still queued in the socket or the receive buffer are dropped.
    fn peer_closed_during_backpressure(&self) -> bool {
        match peer_hung_up(&self.stream) {
            Ok(false) => false,
            Ok(true) => {
                info!(rank = self.rank, peer = %self.peer, "Peer closed connection during backpressure");
                self.connected.store(false, Ordering::Release);
                true
            }
            Err(e) => {
                warn!(rank = self.rank, peer = %self.peer, error = %e, "Socket state check failed");
                self.connected.store(false, Ordering::Release);
                true
            }
        }
    }

    /// Decode frames from `buffer[..held]` and move what is left to the front.
    ///
    /// Returns the new held length and whether parsing stopped on backpressure.
    fn parse_held(&self, buffer: &mut [u8], held: usize) -> (usize, bool) {
        let syncword = self.facade.syncword();
        let capacity = self.settings.max_received_bytes;
        let mut offset = 0;
        let mut stalled = false;

        while offset < held {
            if self.facade.is_at_capacity() {
                stalled = true;
                break;
            }

            let mut packet = self.facade.alloc_net_packet();
            match codec::decode_into(&mut packet, &buffer[offset..held], syncword) {
                Ok(consumed) => {
                    offset += consumed;
                    if packet.integrity_valid {
                        trace!(
                            rank = self.rank,
                            session = packet.session_id,
                            type_id = packet.header.type_id(),
                            "Frame accepted"
                        );
                        self.stats.frames_accepted.fetch_add(1, Ordering::Relaxed);
                        if let Err(rejected) = self.facade.push(packet) {
                            debug!(rank = self.rank, "Packet pool closed, recycling frame");
                            self.facade.dealloc_net_packet(rejected, false);
                        }
                    } else {
                        warn!(
                            rank = self.rank,
                            session = packet.header.session_id(),
                            "Frame integrity mismatch"
                        );
                        self.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
                        self.facade.dealloc_net_packet(packet, false);
                    }
                }
                Err(FrameError::SyncwordNotFound { .. }) => {
                    self.facade.dealloc_net_packet(packet, false);
                    offset = offset.max(held.saturating_sub(SYNCWORD_LEN - 1));
                    break;
                }
                Err(FrameError::BufferTooShort {
                    frame_offset, need, ..
                }) => {
                    self.facade.dealloc_net_packet(packet, false);
                    if need > capacity {
                        warn!(rank = self.rank, need, capacity, "Frame larger than receive buffer");
                        // skip this syncword and look for the next frame
                        offset += frame_offset + 1;
                        continue;
                    }
                    offset += frame_offset;
                    break;
                }
            }
        }

        buffer.copy_within(offset..held, 0);
        (held - offset, stalled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{build_data, build_heartbeat, encode, DEFAULT_SYNCWORD};
    use protocol::ProtocolSettings;
    use std::io::Write;
    use std::net::TcpListener;
    use std::time::Instant;

    fn pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (client, server, peer)
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn worker(
        server: TcpStream,
        peer: SocketAddr,
        facade: &Arc<ProtocolFacade>,
        settings: ConnectionSettings,
    ) -> Arc<ConnectionWorker> {
        ConnectionWorker::create(server, peer, 1, Arc::clone(facade), settings).unwrap()
    }

    #[test]
    fn test_frames_split_across_writes_are_reassembled() {
        let facade = ProtocolFacade::shared(ProtocolSettings::default());
        let (mut client, server, peer) = pair();
        let worker = worker(server, peer, &facade, ConnectionSettings::default());

        let wire = encode(&build_data(DEFAULT_SYNCWORD, 4, 21, vec![0x5A; 100]));
        for chunk in wire.chunks(7) {
            client.write_all(chunk).unwrap();
            client.flush().unwrap();
            thread::sleep(Duration::from_millis(2));
        }

        assert!(wait_until(Duration::from_secs(5), || facade.packet_pool_num() == 1));
        let packet = facade.pop().unwrap();
        assert_eq!(packet.session_id, 21);
        assert_eq!(packet.body, vec![0x5A; 100]);
        assert!(worker.kill_thread());
        assert!(worker.is_exited());
    }

    #[test]
    fn test_corrupt_frame_is_recycled_not_pushed() {
        let facade = ProtocolFacade::shared(ProtocolSettings {
            recycle_capacity: 8,
            ..ProtocolSettings::default()
        });
        let (mut client, server, peer) = pair();
        let worker = worker(server, peer, &facade, ConnectionSettings::default());

        let mut bad = encode(&build_heartbeat(DEFAULT_SYNCWORD, 3, 0));
        bad[5] ^= 0x10;
        let good = encode(&build_heartbeat(DEFAULT_SYNCWORD, 4, 0));
        client.write_all(&[bad, good].concat()).unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            worker.stats().frames_rejected.load(Ordering::Relaxed) == 1
                && facade.packet_pool_num() == 1
        }));
        assert_eq!(facade.pop().unwrap().session_id, 4);
        worker.kill_thread();
    }

    #[test]
    fn test_overflow_discards_buffer() {
        let facade = ProtocolFacade::shared(ProtocolSettings::default());
        let (mut client, server, peer) = pair();
        let settings = ConnectionSettings {
            max_received_bytes: 64,
            ..ConnectionSettings::default()
        };
        let worker = worker(server, peer, &facade, settings);

        // A frame that never fits, then garbage that keeps filling the buffer
        let mut oversized = encode(&build_data(DEFAULT_SYNCWORD, 1, 1, vec![0; 40]));
        oversized.truncate(60);
        client.write_all(&oversized).unwrap();
        client.write_all(&[0xEE; 512]).unwrap();

        let heartbeat = encode(&build_heartbeat(DEFAULT_SYNCWORD, 9, 0));
        assert!(wait_until(Duration::from_secs(5), || worker.bytes_received() >= 572));
        client.write_all(&heartbeat).unwrap();

        assert!(wait_until(Duration::from_secs(5), || facade.packet_pool_num() == 1));
        assert_eq!(facade.pop().unwrap().session_id, 9);
        worker.kill_thread();
    }

    #[test]
    fn test_frame_filling_buffer_exactly_is_not_overflow() {
        let facade = ProtocolFacade::shared(ProtocolSettings::default());
        let (mut client, server, peer) = pair();
        let wire = encode(&build_data(DEFAULT_SYNCWORD, 2, 12, vec![0x11; 40]));
        let settings = ConnectionSettings {
            max_received_bytes: wire.len(),
            ..ConnectionSettings::default()
        };
        let worker = worker(server, peer, &facade, settings);

        client.write_all(&wire).unwrap();
        assert!(wait_until(Duration::from_secs(5), || facade.packet_pool_num() == 1));
        assert_eq!(facade.pop().unwrap().session_id, 12);
        assert_eq!(worker.stats().overflows.load(Ordering::Relaxed), 0);
        worker.kill_thread();
    }

    #[test]
    fn test_hang_up_detected_during_backpressure() {
        let facade = ProtocolFacade::shared(ProtocolSettings {
            max_packet_pool: 1,
            ..ProtocolSettings::default()
        });
        let (mut client, server, peer) = pair();
        let worker = worker(server, peer, &facade, ConnectionSettings::default());

        let mut burst = encode(&build_heartbeat(DEFAULT_SYNCWORD, 1, 0));
        burst.extend(encode(&build_heartbeat(DEFAULT_SYNCWORD, 2, 0)));
        client.write_all(&burst).unwrap();
        assert!(wait_until(Duration::from_secs(5), || facade.packet_pool_num() == 1));
        assert!(worker.is_socket_connection());

        client.shutdown(Shutdown::Both).unwrap();
        drop(client);
        assert!(wait_until(Duration::from_secs(5), || !worker.is_socket_connection()));
        // the pool was never drained
        assert_eq!(facade.packet_pool_num(), 1);
        assert!(worker.kill_thread());
    }

    #[test]
    fn test_closed_peer_marks_disconnected_until_stopped() {
        let facade = ProtocolFacade::shared(ProtocolSettings::default());
        let (client, server, peer) = pair();
        let worker = worker(server, peer, &facade, ConnectionSettings::default());
        assert!(wait_until(Duration::from_secs(5), || {
            worker.lifecycle_step() == LifecycleStep::Running
        }));
        assert!(worker.is_socket_connection());

        drop(client);
        assert!(wait_until(Duration::from_secs(5), || !worker.is_socket_connection()));
        // the thread idles until someone stops it
        assert_eq!(worker.lifecycle_step(), LifecycleStep::Running);

        worker.stop();
        assert!(wait_until(Duration::from_secs(5), || worker.is_exited()));
        assert!(!worker.is_kill_called());
        assert!(worker.kill_thread());
        assert!(worker.is_kill_done());
    }

    #[test]
    fn test_concurrent_kill_thread_tears_down_once() {
        let facade = ProtocolFacade::shared(ProtocolSettings::default());
        let (_client, server, peer) = pair();
        let worker = worker(server, peer, &facade, ConnectionSettings::default());

        let killers: Vec<_> = (0..6)
            .map(|_| {
                let worker = Arc::clone(&worker);
                thread::spawn(move || worker.kill_thread())
            })
            .collect();
        for killer in killers {
            assert!(killer.join().unwrap());
        }
        assert!(worker.is_exited());
        assert!(worker.is_kill_done());
        assert!(worker.handle.lock().is_none());
    }
}
