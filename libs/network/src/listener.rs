//! # Listener Worker
//!
//! Accept thread. Its init step binds the listening socket and starts the
//! [`ConnectionReaper`]; the run loop waits for pending connections, gives
//! each one the next rank id and hands a new [`ConnectionWorker`] to the
//! reaper. On exit the reaper is killed first, which cascades to every
//! connection, and then the listening socket is released.

use crate::connection::{ConnectionSettings, ConnectionWorker};
use crate::error::{NetworkError, Result};
use crate::lifecycle::{KillGate, Lifecycle, LifecycleStep, Signal};
use crate::readiness::wait_readable;
use crate::reaper::ConnectionReaper;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use protocol::ProtocolFacade;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    pub address: IpAddr,
    /// 0 binds an ephemeral port; see [`ListenerWorker::local_addr`]
    pub port: u16,
    pub backlog: i32,
    /// Reaper scan period
    pub reap_interval: Duration,
    /// Upper bound on a single accept readiness wait
    pub accept_poll: Duration,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3717,
            backlog: 100,
            reap_interval: Duration::from_millis(50),
            accept_poll: Duration::from_millis(20),
        }
    }
}

impl ListenerSettings {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Thread-side state
struct ListenerShared {
    settings: ListenerSettings,
    connection_settings: ConnectionSettings,
    facade: Arc<ProtocolFacade>,
    lifecycle: Lifecycle,
    stop: Signal,
    next_rank: AtomicU64,
    reaper: Mutex<Option<Arc<ConnectionReaper>>>,
    /// Duplicate of the listening socket, used only to shut it down
    shutdown_handle: Mutex<Option<Socket>>,
}

pub struct ListenerWorker {
    shared: Arc<ListenerShared>,
    local_addr: SocketAddr,
    handle: Mutex<Option<JoinHandle<()>>>,
    kill: KillGate,
}

impl ListenerWorker {
    /// Start listening and accepting.
    ///
    /// Returns once the socket is bound; a bind failure is returned here and
    /// the thread has already exited.
    pub fn create(
        settings: ListenerSettings,
        facade: Arc<ProtocolFacade>,
        connection_settings: ConnectionSettings,
    ) -> Result<Self> {
        let shared = Arc::new(ListenerShared {
            settings,
            connection_settings,
            facade,
            lifecycle: Lifecycle::new(),
            stop: Signal::new(),
            next_rank: AtomicU64::new(0),
            reaper: Mutex::new(None),
            shutdown_handle: Mutex::new(None),
        });

        let (init_tx, init_rx) = bounded::<Result<SocketAddr>>(1);
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("servo-listener".to_string())
            .spawn(move || thread_shared.run(init_tx))
            .map_err(|e| NetworkError::thread_spawn("servo-listener", e))?;

        let init = init_rx
            .recv()
            .unwrap_or_else(|_| Err(NetworkError::init_failed("listener")));
        match init {
            Ok(local_addr) => Ok(Self {
                shared,
                local_addr,
                handle: Mutex::new(Some(handle)),
                kill: KillGate::new(),
            }),
            Err(e) => {
                if handle.join().is_err() {
                    error!("Listener thread panicked during init");
                }
                Err(e)
            }
        }
    }

    /// Start on `port` of every interface with default connection settings
    pub fn create_on_port(
        port: u16,
        reap_interval: Duration,
        facade: Arc<ProtocolFacade>,
    ) -> Result<Self> {
        let settings = ListenerSettings {
            port,
            reap_interval,
            ..ListenerSettings::default()
        };
        Self::create(settings, facade, ConnectionSettings::default())
    }

    /// Bound address; carries the real port when 0 was requested
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn lifecycle_step(&self) -> LifecycleStep {
        self.shared.lifecycle.get()
    }

    /// Lifecycle of the reaper, `Constructed` before it exists
    pub fn pool_lifecycle_step(&self) -> LifecycleStep {
        self.reaper()
            .map(|reaper| reaper.lifecycle_step())
            .unwrap_or(LifecycleStep::Constructed)
    }

    /// Rank the next accepted connection will get
    pub fn next_rank_id(&self) -> u64 {
        self.shared.next_rank.load(Ordering::Acquire)
    }

    /// Connections currently held by the reaper
    pub fn connection_count(&self) -> usize {
        self.reaper().map(|reaper| reaper.live_count()).unwrap_or(0)
    }

    pub fn reaper(&self) -> Option<Arc<ConnectionReaper>> {
        self.shared.reaper.lock().clone()
    }

    pub fn facade(&self) -> &Arc<ProtocolFacade> {
        &self.shared.facade
    }

    pub fn is_exited(&self) -> bool {
        self.shared.lifecycle.is_exited()
    }

    pub fn is_kill_done(&self) -> bool {
        self.kill.is_done()
    }

    /// Signal the accept loop to end and shut the listening socket down
    pub fn stop(&self) {
        if !self.shared.stop.raise() {
            return;
        }
        debug!(addr = %self.local_addr, "Stopping listener");
        if let Some(socket) = self.shared.shutdown_handle.lock().as_ref() {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!(error = %e, "Listening socket shutdown");
            }
        }
    }

    /// Stop and join the listener. The thread kills the reaper, and with it
    /// every connection, before exiting.
    pub fn kill_thread(&self) -> bool {
        self.kill.kill(|| {
            self.stop();
            let handle = self.handle.lock().take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!("Listener thread panicked");
                    self.shared.exit();
                }
            }
        })
    }
}

impl Drop for ListenerWorker {
    fn drop(&mut self) {
        self.kill_thread();
    }
}

impl std::fmt::Debug for ListenerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerWorker")
            .field("local_addr", &self.local_addr)
            .field("step", &self.lifecycle_step())
            .field("next_rank", &self.next_rank_id())
            .finish()
    }
}

impl ListenerShared {
    fn run(&self, init_tx: crossbeam_channel::Sender<Result<SocketAddr>>) {
        self.lifecycle.set(LifecycleStep::Init);
        let listener = match self.init() {
            Ok(listener) => listener,
            Err(e) => {
                warn!(error = %e, "Listener init failed");
                self.exit();
                // create() is blocked on this channel
                let _ = init_tx.send(Err(e));
                return;
            }
        };

        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.exit();
                let _ = init_tx.send(Err(NetworkError::io("listener local address", e)));
                return;
            }
        };
        self.lifecycle.set(LifecycleStep::Running);
        info!(
            addr = %local_addr,
            backlog = self.settings.backlog,
            "Listening for connections"
        );
        let _ = init_tx.send(Ok(local_addr));

        self.accept_loop(&listener);

        self.exit();
        drop(listener);
        info!(addr = %local_addr, "Listener exited");
    }

    fn init(&self) -> Result<TcpListener> {
        let addr = self.settings.socket_addr();
        let socket = bind_socket(addr, self.settings.backlog).map_err(|e| {
            warn!(addr = %addr, error = %e, "Listener bind failed");
            NetworkError::bind(addr, e)
        })?;
        let shutdown_handle = socket
            .try_clone()
            .map_err(|e| NetworkError::io("clone listening socket", e))?;
        *self.shutdown_handle.lock() = Some(shutdown_handle);

        let reaper = ConnectionReaper::create(self.settings.reap_interval)?;
        *self.reaper.lock() = Some(reaper);
        Ok(socket.into())
    }

    fn accept_loop(&self, listener: &TcpListener) {
        while !self.stop.is_raised() {
            match wait_readable(listener, self.settings.accept_poll) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(error = %e, "Accept readiness wait failed");
                    self.stop.wait(self.settings.accept_poll);
                    continue;
                }
            }

            match listener.accept() {
                Ok((stream, peer)) => self.hand_off(stream, peer),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                            | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    debug!(error = %e, "Transient accept error");
                }
                Err(e) => {
                    if !self.stop.is_raised() {
                        error!(error = %e, "Accept failed, listener stopping");
                    }
                    break;
                }
            }
        }
    }

    fn hand_off(&self, stream: TcpStream, peer: SocketAddr) {
        let rank = self.next_rank.fetch_add(1, Ordering::AcqRel);
        let worker = match ConnectionWorker::create(
            stream,
            peer,
            rank,
            Arc::clone(&self.facade),
            self.connection_settings.clone(),
        ) {
            Ok(worker) => worker,
            Err(e) => {
                warn!(rank, peer = %peer, error = %e, "Failed to start connection");
                return;
            }
        };

        let reaper = self.reaper.lock().clone();
        let held = match reaper {
            Some(reaper) => reaper.safe_hold_thread(Arc::clone(&worker)),
            None => Err(NetworkError::ReaperNotRunning),
        };
        match held {
            Ok(()) => info!(rank, peer = %peer, "Accepted connection"),
            Err(e) => {
                warn!(rank, peer = %peer, error = %e, "Dropping connection");
                worker.kill_thread();
            }
        }
    }

    /// Kill the reaper, then mark the listener exited
    fn exit(&self) {
        self.lifecycle.set(LifecycleStep::Exiting);
        let reaper = self.reaper.lock().clone();
        if let Some(reaper) = reaper {
            reaper.kill_thread();
        }
        self.shutdown_handle.lock().take();
        self.lifecycle.set(LifecycleStep::Exited);
    }
}

/// Nonblocking TCP socket bound to `addr` and listening
fn bind_socket(addr: SocketAddr, backlog: i32) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(backlog)?;
    Ok(socket)
}
