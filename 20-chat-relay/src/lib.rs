//! Multi-client text relay built on a single-threaded readiness reactor.
//!
//! One server process accepts TCP peers and forwards the raw bytes any peer
//! sends to every other connected peer. Join and departure notices are plain
//! text broadcast the same way. Each module has one responsibility:
//!
//! - [`registry`] tracks the connections that form the broadcast group.
//! - [`multiplexer`] wraps `mio` readiness polling for the listener, the
//!   peers and a cross-thread waker.
//! - [`relay`] fans one payload out to every peer except its origin and prunes
//!   peers whose writes fail.
//! - [`server`] is the reactor loop tying the three together.
//! - [`session`] is the client's connection with bounded-wait send/receive.
//! - [`client`] multiplexes terminal input and the session.
//! - [`message`] holds the notice texts and the decode policy.
//! - [`cli`], [`config`] and [`error`] cover the command line, defaults and
//!   failures.
//!
//! There is no framing on the wire: a receiver sees one read's worth of bytes
//! per message, so sender boundaries are not preserved.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod multiplexer;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;

pub use error::{Error, Result};
