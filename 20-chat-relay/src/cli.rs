use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    DEFAULT_BUFFER_CAPACITY, DEFAULT_EVENTS_CAPACITY, DEFAULT_HOST, DEFAULT_MAX_OUTBOX_BYTES,
    DEFAULT_PORT, Endpoint, PollMode, ServerConfig, SessionConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server, broadcasting every message to all other peers.
    Server(ServerArgs),
    /// Connect to a relay server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Host name or address to listen on.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum bytes read from a peer per message.
    #[arg(long, default_value_t = DEFAULT_BUFFER_CAPACITY)]
    pub buffer_size: usize,

    /// Poll timeout in milliseconds. 0 busy-polls; omit to block until ready.
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Bytes a slow peer may have queued before it is disconnected.
    #[arg(long, default_value_t = DEFAULT_MAX_OUTBOX_BYTES)]
    pub max_outbox_bytes: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Host name or address of the relay server.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port of the relay server.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Name shown for the local participant.
    #[arg(long, default_value = "Me")]
    pub username: String,

    /// Name shown for the chat partner.
    #[arg(long, default_value = "Partner")]
    pub partner: String,

    /// Connect and receive timeout in milliseconds.
    #[arg(long, default_value_t = 200)]
    pub timeout_ms: u64,

    /// Maximum bytes read from the server per message.
    #[arg(long, default_value_t = DEFAULT_BUFFER_CAPACITY)]
    pub buffer_size: usize,
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            endpoint: Endpoint::new(args.host, args.port),
            buffer_capacity: args.buffer_size,
            poll_mode: PollMode::from_interval(args.poll_interval_ms.map(Duration::from_millis)),
            max_outbox_bytes: args.max_outbox_bytes,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
        }
    }
}

impl From<ClientArgs> for SessionConfig {
    fn from(args: ClientArgs) -> Self {
        Self {
            endpoint: Endpoint::new(args.host, args.port),
            timeout: Duration::from_millis(args.timeout_ms),
            buffer_capacity: args.buffer_size,
            username: args.username,
            partner_name: args.partner,
        }
    }
}
