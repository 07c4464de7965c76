use std::{
    io::{self, ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use mio::{
    Interest, Waker,
    net::{TcpListener, TcpStream},
};
use tokio::select;
use tracing::{debug, error, info, warn};

use crate::{
    config::{PollMode, ServerConfig},
    error::{Error, Result},
    message,
    multiplexer::{FIRST_CONNECTION_TOKEN, Multiplexer, Readiness},
    registry::{ConnectionId, IdAllocator, Registry},
    relay::{self, Peer},
};

/// Reads taken from one peer before the reactor moves on to the others.
pub const MAX_READS_PER_EVENT: usize = 16;

/// Server side of one accepted peer.
struct Connection {
    stream: TcpStream,
    /// Captured at accept time so notices never depend on a dead socket.
    peer_addr: SocketAddr,
    /// Bytes the kernel has not taken yet, oldest first.
    outbox: Vec<u8>,
    max_outbox_bytes: usize,
    interest: Interest,
}

impl Connection {
    fn new(stream: TcpStream, peer_addr: SocketAddr, max_outbox_bytes: usize) -> Self {
        Self {
            stream,
            peer_addr,
            outbox: Vec::new(),
            max_outbox_bytes,
            interest: Interest::READABLE,
        }
    }

    /// Writes as much of `bytes` as the socket accepts without blocking.
    fn write_some(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(written)
    }

    fn enqueue(&mut self, rest: &[u8]) -> io::Result<()> {
        if self.outbox.len() + rest.len() > self.max_outbox_bytes {
            return Err(io::Error::other(format!(
                "outbound queue exceeded {} bytes",
                self.max_outbox_bytes
            )));
        }
        self.outbox.extend_from_slice(rest);
        Ok(())
    }

    fn flush_outbox(&mut self) -> io::Result<()> {
        let pending = std::mem::take(&mut self.outbox);
        let written = self.write_some(&pending);
        self.outbox = pending;
        let written = written?;
        self.outbox.drain(..written);
        Ok(())
    }

    fn wanted_interest(&self) -> Interest {
        if self.outbox.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }
}

impl Peer for Connection {
    fn deliver(&mut self, payload: &[u8]) -> io::Result<()> {
        // Queued bytes go first so a peer never sees chunks out of order.
        if !self.outbox.is_empty() {
            return self.enqueue(payload);
        }
        let written = self.write_some(payload)?;
        self.enqueue(&payload[written..])
    }

    fn close(&mut self) {
        if let Err(error) = self.stream.shutdown(Shutdown::Both) {
            debug!(peer = %self.peer_addr, ?error, "shutdown of closed peer failed");
        }
    }
}

/// Whether the reactor should keep going after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stopped,
}

/// Requests a drain of a running [`Server`] from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::SeqCst);
        self.waker.wake()
    }
}

/// Single-threaded broadcast reactor.
///
/// Every accepted connection is relayed the raw bytes any other connection
/// sends. All registry mutation happens inside [`Server::poll_once`].
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    multiplexer: Multiplexer,
    registry: Registry<Connection>,
    ids: IdAllocator,
    config: ServerConfig,
    read_buf: Vec<u8>,
    /// Peers cut off by [`MAX_READS_PER_EVENT`] that still have data buffered.
    backlog: Vec<ConnectionId>,
    shutdown_requested: Arc<AtomicBool>,
}

impl Server {
    /// Binds the first address the configured endpoint resolves to that
    /// accepts a listener.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let mut last_error = None;
        for addr in config.endpoint.resolve()? {
            match TcpListener::bind(addr) {
                Ok(listener) => return Self::from_listener(listener, config),
                Err(source) => last_error = Some(Error::Bind { addr, source }),
            }
        }
        Err(last_error.unwrap_or_else(|| Error::NoAddress(config.endpoint.clone())))
    }

    fn from_listener(mut listener: TcpListener, config: ServerConfig) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let multiplexer = Multiplexer::new(config.events_capacity)?;
        multiplexer.register_listener(&mut listener)?;

        Ok(Self {
            listener: Some(listener),
            local_addr,
            multiplexer,
            registry: Registry::new(),
            ids: IdAllocator::starting_at(FIRST_CONNECTION_TOKEN),
            read_buf: vec![0; config.buffer_capacity.max(1)],
            config,
            backlog: Vec::new(),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote addresses of the registered peers, in registration order.
    pub fn peer_addrs(&self) -> Vec<SocketAddr> {
        self.registry
            .members()
            .map(|(_, conn)| conn.peer_addr)
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            requested: Arc::clone(&self.shutdown_requested),
            waker: self.multiplexer.waker(),
        }
    }

    /// Serves until a [`ShutdownHandle`] fires, then drains.
    pub fn run(mut self) -> Result<()> {
        let mode = self.config.poll_mode;
        while self.poll_once(mode)? == Flow::Continue {}
        Ok(())
    }

    /// Runs the reactor on a blocking thread and drains it on Ctrl-C.
    pub async fn run_until_ctrl_c(self) -> anyhow::Result<()> {
        let handle = self.shutdown_handle();
        let mut reactor = tokio::task::spawn_blocking(move || self.run());

        select! {
            result = &mut reactor => return Ok(result??),
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = ?err, "failed to install ctrl-c handler");
                }
                handle.shutdown()?;
            }
        }

        reactor.await??;
        Ok(())
    }

    /// One reactor iteration: poll once and handle every ready event.
    pub fn poll_once(&mut self, mode: PollMode) -> Result<Flow> {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            self.drain();
            return Ok(Flow::Stopped);
        }

        // Backlogged peers get no new edge, so the wait must not block.
        let mode = if self.backlog.is_empty() {
            mode
        } else {
            PollMode::Immediate
        };
        let mut ready = self.multiplexer.poll(mode)?;
        if !self.backlog.is_empty() {
            ready.extend(self.backlog.drain(..).map(Readiness::Readable));
            ready.sort_by_key(Readiness::order_key);
            ready.dedup();
        }

        for readiness in ready {
            match readiness {
                Readiness::Wake => {
                    if self.shutdown_requested.load(Ordering::SeqCst) {
                        self.drain();
                        return Ok(Flow::Stopped);
                    }
                }
                Readiness::Incoming => self.accept_pending(),
                Readiness::Readable(id) => self.read_from(id),
                Readiness::Writable(id) => self.flush(id),
            }
        }

        self.sync_interest();
        Ok(Flow::Continue)
    }

    fn accept_pending(&mut self) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            match listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
                    ) =>
                {
                    warn!(error = ?err, "transient accept error");
                }
                Err(err) => {
                    error!(error = ?err, "failed to accept connection");
                    return;
                }
            }
        }
    }

    fn admit(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        let id = self.ids.next_id();
        if let Err(err) = self
            .multiplexer
            .register(&mut stream, id, Interest::READABLE)
        {
            warn!(%peer, error = ?err, "failed to register connection");
            return;
        }

        info!(%peer, %id, "client connected");
        self.registry.register(
            id,
            Connection::new(stream, peer, self.config.max_outbox_bytes),
        );
        self.relay(Some(id), message::join_notice(peer).as_bytes());
    }

    fn read_from(&mut self, id: ConnectionId) {
        for _ in 0..MAX_READS_PER_EVENT {
            let Some(conn) = self.registry.get_mut(id) else {
                return;
            };
            let peer = conn.peer_addr;

            match conn.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    self.disconnect(id);
                    return;
                }
                Ok(len) => {
                    let chunk = &self.read_buf[..len];
                    debug!(%peer, len, text = %message::decode(chunk), "relaying chunk");
                    let report = relay::broadcast(&mut self.registry, Some(id), chunk);
                    self.log_pruned(&report.pruned);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%peer, error = ?err, "read failed, treating peer as gone");
                    self.disconnect(id);
                    return;
                }
            }
        }
        if self.registry.contains(id) {
            self.backlog.push(id);
        }
    }

    fn flush(&mut self, id: ConnectionId) {
        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };
        if let Err(err) = conn.flush_outbox() {
            warn!(peer = %conn.peer_addr, error = ?err, "dropping peer after failed write");
            self.remove(id);
        }
    }

    /// Deregisters `id` and tells the remaining peers it left.
    fn disconnect(&mut self, id: ConnectionId) {
        let Some(peer) = self.remove(id) else {
            return;
        };
        info!(%peer, %id, "client disconnected");
        self.relay(None, message::departure_notice(peer).as_bytes());
    }

    fn remove(&mut self, id: ConnectionId) -> Option<SocketAddr> {
        let mut conn = self.registry.deregister(id)?;
        if let Err(err) = self.multiplexer.deregister(&mut conn.stream) {
            debug!(%id, error = ?err, "deregistering closed connection failed");
        }
        Some(conn.peer_addr)
    }

    fn relay(&mut self, origin: Option<ConnectionId>, payload: &[u8]) {
        let report = relay::broadcast(&mut self.registry, origin, payload);
        self.log_pruned(&report.pruned);
    }

    fn log_pruned(&self, pruned: &[ConnectionId]) {
        if !pruned.is_empty() {
            debug!(?pruned, remaining = self.registry.len(), "pruned broken peers");
        }
    }

    /// Asks for writable events only while a peer has queued bytes.
    fn sync_interest(&mut self) {
        let mut failed = Vec::new();
        for (id, conn) in self.registry.members_mut() {
            let wanted = conn.wanted_interest();
            if wanted == conn.interest {
                continue;
            }
            match self.multiplexer.reregister(&mut conn.stream, id, wanted) {
                Ok(()) => conn.interest = wanted,
                Err(err) => {
                    warn!(peer = %conn.peer_addr, error = ?err, "failed to update interest");
                    failed.push(id);
                }
            }
        }
        for id in failed {
            self.remove(id);
        }
    }

    /// Stops accepting, tells every peer, then closes them all.
    fn drain(&mut self) {
        info!(peers = self.registry.len(), "chat server shutting down");

        if let Some(mut listener) = self.listener.take() {
            if let Err(err) = self.multiplexer.deregister(&mut listener) {
                debug!(error = ?err, "deregistering listener failed");
            }
        }

        self.relay(None, message::SHUTDOWN_NOTICE.as_bytes());

        self.backlog.clear();
        for (id, mut conn) in self.registry.drain() {
            if let Err(err) = conn.flush_outbox() {
                debug!(%id, error = ?err, "unsent bytes dropped at shutdown");
            }
            if let Err(err) = self.multiplexer.deregister(&mut conn.stream) {
                debug!(%id, error = ?err, "deregistering connection failed");
            }
            conn.close();
        }
    }
}
