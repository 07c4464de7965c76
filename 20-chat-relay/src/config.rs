//! Endpoints, defaults and tunables shared by the server and the client.

use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

use crate::error::{Error, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9009;

/// Maximum number of bytes taken from a socket per read; one read is one message.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// How long a client waits for the network before reporting "no message".
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(200);

/// Bytes a slow peer may have queued before it is treated as broken.
pub const DEFAULT_MAX_OUTBOX_BYTES: usize = 1024 * 1024;

pub const DEFAULT_EVENTS_CAPACITY: usize = 256;

/// Host name plus port, resolved lazily so `localhost` works on any stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Every socket address the host resolves to, in resolver order.
    pub fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| Error::Resolve {
                endpoint: self.clone(),
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(Error::NoAddress(self.clone()));
        }
        Ok(addrs)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How long a single multiplexer poll may wait for readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Zero timeout; the caller spins.
    Immediate,
    /// Wait at most the given duration.
    Bounded(Duration),
    /// Wait until something is ready or the poller is woken.
    Blocking,
}

impl PollMode {
    pub fn timeout(self) -> Option<Duration> {
        match self {
            PollMode::Immediate => Some(Duration::ZERO),
            PollMode::Bounded(timeout) => Some(timeout),
            PollMode::Blocking => None,
        }
    }

    /// `None` blocks, `Some(0)` spins, anything else bounds the wait.
    pub fn from_interval(interval: Option<Duration>) -> Self {
        match interval {
            None => PollMode::Blocking,
            Some(interval) if interval.is_zero() => PollMode::Immediate,
            Some(interval) => PollMode::Bounded(interval),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub endpoint: Endpoint,
    pub buffer_capacity: usize,
    pub poll_mode: PollMode,
    pub max_outbox_bytes: usize,
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            poll_mode: PollMode::Blocking,
            max_outbox_bytes: DEFAULT_MAX_OUTBOX_BYTES,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    /// Bounds the connect attempt, each send and each receive wait.
    pub timeout: Duration,
    pub buffer_capacity: usize,
    /// Display label for the local user. Never sent over the wire.
    pub username: String,
    /// Display label for the other side. Never sent over the wire.
    pub partner_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            timeout: DEFAULT_SESSION_TIMEOUT,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            username: "Me".to_string(),
            partner_name: "Partner".to_string(),
        }
    }
}
