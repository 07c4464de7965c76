//! Readiness polling over the listening endpoint and the registered peers.
//!
//! A thin layer over [`mio::Poll`]. Tokens below [`FIRST_CONNECTION_TOKEN`]
//! are reserved for the listener and the cross-thread waker; every other
//! token is a [`ConnectionId`].
//!
//! `mio` is edge-triggered: a handle reported readable stays silent until new
//! data arrives, so consumers must read until `WouldBlock` before polling
//! again.

use std::{
    io::{self, ErrorKind},
    sync::Arc,
};

use mio::{Events, Interest, Poll, Token, Waker, event::Source, net::TcpListener};
use tracing::trace;

use crate::{config::PollMode, registry::ConnectionId};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);

/// First token value available to connections.
pub const FIRST_CONNECTION_TOKEN: usize = 2;

/// One thing the reactor has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Another thread fired the waker.
    Wake,
    /// The listening endpoint has connections waiting to be accepted.
    Incoming,
    /// Data, end-of-stream or an error is pending on a connection.
    Readable(ConnectionId),
    /// A connection can take more outbound bytes.
    Writable(ConnectionId),
}

impl Readiness {
    /// Wake first, then new connections, then peers ascending by id, reads
    /// before writes for the same peer.
    pub(crate) fn order_key(&self) -> (u8, usize, u8) {
        match self {
            Readiness::Wake => (0, 0, 0),
            Readiness::Incoming => (1, 0, 0),
            Readiness::Readable(id) => (2, id.0, 0),
            Readiness::Writable(id) => (2, id.0, 1),
        }
    }
}

pub struct Multiplexer {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
}

impl Multiplexer {
    pub fn new(events_capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(events_capacity),
            waker,
        })
    }

    /// Handle other threads use to interrupt a pending [`Multiplexer::poll`].
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    pub fn register_listener(&self, listener: &mut TcpListener) -> io::Result<()> {
        self.poll
            .registry()
            .register(listener, LISTENER, Interest::READABLE)
    }

    pub fn register<S>(
        &self,
        source: &mut S,
        id: ConnectionId,
        interest: Interest,
    ) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().register(source, Token(id.0), interest)
    }

    pub fn reregister<S>(
        &self,
        source: &mut S,
        id: ConnectionId,
        interest: Interest,
    ) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().reregister(source, Token(id.0), interest)
    }

    pub fn deregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Waits according to `mode` and returns every ready handle once, in a
    /// deterministic order. An interrupted wait yields no events.
    pub fn poll(&mut self, mode: PollMode) -> io::Result<Vec<Readiness>> {
        match self.poll.poll(&mut self.events, mode.timeout()) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(err) => return Err(err),
        }

        let mut ready = Vec::new();
        for event in self.events.iter() {
            match event.token() {
                WAKER => ready.push(Readiness::Wake),
                LISTENER => ready.push(Readiness::Incoming),
                Token(raw) => {
                    let id = ConnectionId(raw);
                    // Hang-ups and socket errors are surfaced through the read
                    // path, which sees end-of-stream or the error itself.
                    if event.is_readable() || event.is_read_closed() || event.is_error() {
                        ready.push(Readiness::Readable(id));
                    }
                    if event.is_writable() {
                        ready.push(Readiness::Writable(id));
                    }
                }
            }
        }

        ready.sort_by_key(Readiness::order_key);
        ready.dedup();
        trace!(count = ready.len(), "poll returned");
        Ok(ready)
    }
}
