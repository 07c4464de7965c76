use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::config::Endpoint;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures that reach the operator or the user.
///
/// Write failures on individual peers during a broadcast are not represented
/// here: the relay recovers from them locally.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to resolve {endpoint}")]
    Resolve {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    #[error("{0} did not resolve to any address")]
    NoAddress(Endpoint),

    #[error("failed to bind listening endpoint {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("unable to connect to {} at port {}", .endpoint.host, .endpoint.port)]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    #[error("timed out sending to the chat server")]
    SendTimedOut,

    /// The server dropped the connection while we were writing. The next
    /// [`crate::session::Session::receive`] reports the close.
    #[error("chat server closed the connection")]
    Disconnected,

    #[error("chat session has already ended")]
    SessionEnded,

    #[error(transparent)]
    Io(#[from] io::Error),
}
