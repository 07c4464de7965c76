//! Client side of the chat: one outbound connection with bounded waits.

use std::{
    io::{self, ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream as StdTcpStream},
    sync::Arc,
    time::Instant,
};

use mio::{Interest, Waker, net::TcpStream};
use tracing::{debug, info};

use crate::{
    config::{PollMode, SessionConfig},
    error::{Error, Result},
    message,
    multiplexer::{FIRST_CONNECTION_TOKEN, Multiplexer},
    registry::ConnectionId,
};

const SERVER: ConnectionId = ConnectionId(FIRST_CONNECTION_TOKEN);
const EVENTS_CAPACITY: usize = 8;

/// Outcome of one [`Session::receive`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Nothing arrived within the wait. Not an error.
    Idle,
    /// One read's worth of text.
    Message(String),
    /// The server closed the connection. Returned once per session.
    Closed,
}

pub struct Session {
    stream: TcpStream,
    multiplexer: Multiplexer,
    peer_addr: SocketAddr,
    config: SessionConfig,
    read_buf: Vec<u8>,
    /// A write found the server gone; `Closed` is still owed to the caller.
    hung_up: bool,
    ended: bool,
}

impl Session {
    /// Connects to the configured endpoint, trying each resolved address
    /// within the session timeout. Failure is final; nothing is retried.
    pub fn connect(config: SessionConfig) -> Result<Self> {
        let mut last_error = None;
        for addr in config.endpoint.resolve()? {
            match StdTcpStream::connect_timeout(&addr, config.timeout) {
                Ok(stream) => return Self::from_stream(stream, config),
                Err(err) => {
                    debug!(%addr, error = ?err, "connect attempt failed");
                    last_error = Some(err);
                }
            }
        }

        Err(Error::Connect {
            source: last_error.unwrap_or_else(|| io::Error::from(ErrorKind::NotFound)),
            endpoint: config.endpoint,
        })
    }

    fn from_stream(stream: StdTcpStream, config: SessionConfig) -> Result<Self> {
        stream.set_nonblocking(true)?;
        let peer_addr = stream.peer_addr()?;
        let mut stream = TcpStream::from_std(stream);

        let multiplexer = Multiplexer::new(EVENTS_CAPACITY)?;
        multiplexer.register(&mut stream, SERVER, Interest::READABLE)?;
        info!(%peer_addr, "connected to chat server");

        Ok(Self {
            stream,
            multiplexer,
            peer_addr,
            read_buf: vec![0; config.buffer_capacity.max(1)],
            config,
            hung_up: false,
            ended: false,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Wakes a pending [`Session::receive`] wait, which then returns
    /// [`Inbound::Idle`] unless data is already there.
    pub fn waker(&self) -> Arc<Waker> {
        self.multiplexer.waker()
    }

    pub fn send(&mut self, text: &str) -> Result<()> {
        self.send_bytes(message::encode(text))
    }

    /// Writes all of `bytes`, waiting at most the session timeout for the
    /// socket to drain. No reply is awaited.
    ///
    /// Fails with [`Error::Disconnected`] if the server has gone away; the
    /// following [`Session::receive`] then yields [`Inbound::Closed`].
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.ended {
            return Err(Error::SessionEnded);
        }
        if self.hung_up {
            return Err(Error::Disconnected);
        }

        let deadline = Instant::now() + self.config.timeout;
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    self.await_writable(deadline)?
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_hang_up(&err) => {
                    debug!(error = ?err, "server gone while sending");
                    self.hung_up = true;
                    return Err(Error::Disconnected);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn await_writable(&mut self, deadline: Instant) -> Result<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::SendTimedOut);
        }

        self.multiplexer.reregister(
            &mut self.stream,
            SERVER,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        let polled = self.multiplexer.poll(PollMode::Bounded(remaining));
        self.multiplexer
            .reregister(&mut self.stream, SERVER, Interest::READABLE)?;
        polled?;
        Ok(())
    }

    /// Waits at most the session timeout for something from the server.
    ///
    /// After [`Inbound::Closed`] has been returned, or after [`Session::close`],
    /// every call fails with [`Error::SessionEnded`].
    pub fn receive(&mut self) -> Result<Inbound> {
        if self.ended {
            return Err(Error::SessionEnded);
        }

        // Readiness is edge-triggered, so leftovers from an earlier read are
        // checked before waiting.
        if let Some(inbound) = self.try_read()? {
            return Ok(inbound);
        }
        self.multiplexer
            .poll(PollMode::Bounded(self.config.timeout))?;
        Ok(self.try_read()?.unwrap_or(Inbound::Idle))
    }

    fn try_read(&mut self) -> Result<Option<Inbound>> {
        loop {
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    self.end();
                    return Ok(Some(Inbound::Closed));
                }
                Ok(len) => {
                    let text = message::decode(&self.read_buf[..len]).into_owned();
                    return Ok(Some(Inbound::Message(text)));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if !self.hung_up {
                        return Ok(None);
                    }
                    self.end();
                    return Ok(Some(Inbound::Closed));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_hang_up(&err) => {
                    debug!(error = ?err, "server connection dropped");
                    self.end();
                    return Ok(Some(Inbound::Closed));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Ends the session from the local side.
    pub fn close(&mut self) {
        if !self.ended {
            self.end();
        }
    }

    fn end(&mut self) {
        self.ended = true;
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            debug!(error = ?err, "session shutdown failed");
        }
    }
}

fn is_hang_up(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}
