use std::{borrow::Cow, net::SocketAddr};

/// Trimmed from inbound chunks before they are shown on a terminal.
const LINE_ENDINGS: &[char] = &['\n', '\r'];

pub const SHUTDOWN_NOTICE: &str = "Server is shutting down\n";

/// Broadcast to existing peers when `peer` is accepted.
pub fn join_notice(peer: SocketAddr) -> String {
    format!("[{}:{}] entered our chat session\n", peer.ip(), peer.port())
}

/// Broadcast to the remaining peers once `peer` has left.
pub fn departure_notice(peer: SocketAddr) -> String {
    format!("Client ({}, {}) is offline\n", peer.ip(), peer.port())
}

pub fn encode(text: &str) -> &[u8] {
    text.as_bytes()
}

/// Outbound form of one line typed by the user.
pub fn encode_line(text: &str) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(text.len() + 1);
    encoded.extend_from_slice(text.trim_end_matches(LINE_ENDINGS).as_bytes());
    encoded.push(b'\n');
    encoded
}

/// Chunks are arbitrary slices of the stream, so a multi-byte character can
/// be split across two reads. Invalid sequences become U+FFFD instead of
/// failing the read.
pub fn decode(chunk: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(chunk)
}

pub fn display_text(text: &str) -> &str {
    text.trim_end_matches(LINE_ENDINGS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_carry_the_peer_address() {
        let peer: SocketAddr = "127.0.0.1:50123".parse().unwrap();
        assert_eq!(
            join_notice(peer),
            "[127.0.0.1:50123] entered our chat session\n"
        );
        assert_eq!(departure_notice(peer), "Client (127.0.0.1, 50123) is offline\n");
    }

    #[test]
    fn ipv6_notices_use_bare_address() {
        let peer: SocketAddr = "[::1]:9009".parse().unwrap();
        assert_eq!(join_notice(peer), "[::1:9009] entered our chat session\n");
        assert_eq!(departure_notice(peer), "Client (::1, 9009) is offline\n");
    }

    #[test]
    fn decode_replaces_malformed_bytes() {
        let split = "é".as_bytes();
        assert_eq!(decode(&split[..1]), "\u{FFFD}");
        assert_eq!(decode(b"hello"), "hello");
    }

    #[test]
    fn encode_line_appends_a_single_newline() {
        assert_eq!(encode_line("hello"), b"hello\n");
        assert_eq!(encode_line("hello\r\n"), b"hello\n");
        assert_eq!(encode_line(""), b"\n");
    }

    #[test]
    fn display_trims_line_endings_only() {
        assert_eq!(display_text("  hi there\r\n"), "  hi there");
        assert_eq!(display_text("a\nb\n"), "a\nb");
    }
}
