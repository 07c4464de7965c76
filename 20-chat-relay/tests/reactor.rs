use std::{
    io::{ErrorKind, Read, Write},
    net::{SocketAddr, TcpStream},
    time::{Duration, Instant},
};

use anyhow::Result;
use chat_relay::{
    config::{Endpoint, PollMode, ServerConfig},
    message::{SHUTDOWN_NOTICE, departure_notice, join_notice},
    server::{Flow, Server},
};

const STEP: PollMode = PollMode::Bounded(Duration::from_millis(10));
const DEADLINE: Duration = Duration::from_secs(2);

fn local_server() -> Result<Server> {
    Ok(Server::bind(ServerConfig {
        endpoint: Endpoint::new("127.0.0.1", 0),
        ..ServerConfig::default()
    })?)
}

fn connect(server: &Server) -> Result<TcpStream> {
    let stream = TcpStream::connect(server.local_addr())?;
    stream.set_read_timeout(Some(Duration::from_millis(10)))?;
    Ok(stream)
}

/// Runs reactor iterations until `done` holds.
fn pump_until(server: &mut Server, mut done: impl FnMut(&Server) -> bool) -> Result<()> {
    let deadline = Instant::now() + DEADLINE;
    while !done(server) {
        anyhow::ensure!(Instant::now() < deadline, "server never reached expected state");
        server.poll_once(STEP)?;
    }
    Ok(())
}

/// Keeps the reactor running while `client` waits for `expected` bytes.
fn pump_and_read(server: &mut Server, client: &mut TcpStream, expected: usize) -> Result<Vec<u8>> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = Instant::now() + DEADLINE;
    while received.len() < expected {
        anyhow::ensure!(
            Instant::now() < deadline,
            "timed out with {:?}",
            String::from_utf8_lossy(&received)
        );
        server.poll_once(STEP)?;
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(len) => received.extend_from_slice(&buf[..len]),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(received)
}

/// Pumps the reactor for a while and returns whatever `client` got.
fn drain_for(server: &mut Server, client: &mut TcpStream, window: Duration) -> Result<Vec<u8>> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let until = Instant::now() + window;
    while Instant::now() < until {
        server.poll_once(STEP)?;
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(len) => received.extend_from_slice(&buf[..len]),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(received)
}

fn addr_of(stream: &TcpStream) -> SocketAddr {
    stream.local_addr().expect("client local address")
}

#[test]
fn join_chat_and_departure_scenario() -> Result<()> {
    let mut server = local_server()?;

    // A alone: its own join notice goes nowhere.
    let mut alice = connect(&server)?;
    pump_until(&mut server, |s| s.peer_count() == 1)?;
    assert!(drain_for(&mut server, &mut alice, Duration::from_millis(50))?.is_empty());

    // B joins: only A hears about it.
    let mut bob = connect(&server)?;
    let bob_addr = addr_of(&bob);
    let notice = join_notice(bob_addr);
    let heard = pump_and_read(&mut server, &mut alice, notice.len())?;
    assert_eq!(String::from_utf8(heard)?, notice);
    assert!(drain_for(&mut server, &mut bob, Duration::from_millis(50))?.is_empty());

    // A speaks: B gets the exact bytes, A gets no echo.
    alice.write_all(b"hello")?;
    let heard = pump_and_read(&mut server, &mut bob, 5)?;
    assert_eq!(heard, b"hello");
    assert!(drain_for(&mut server, &mut alice, Duration::from_millis(50))?.is_empty());

    // B leaves: A hears the departure with B's address and B is gone.
    drop(bob);
    let notice = departure_notice(bob_addr);
    let heard = pump_and_read(&mut server, &mut alice, notice.len())?;
    assert_eq!(String::from_utf8(heard)?, notice);
    assert_eq!(server.peer_addrs(), vec![addr_of(&alice)]);

    Ok(())
}

#[test]
fn registry_count_follows_connects_and_disconnects() -> Result<()> {
    let mut server = local_server()?;

    let mut clients = Vec::new();
    for _ in 0..4 {
        clients.push(connect(&server)?);
    }
    pump_until(&mut server, |s| s.peer_count() == 4)?;

    clients.remove(0);
    clients.remove(1);
    pump_until(&mut server, |s| s.peer_count() == 2)?;

    let remaining: Vec<SocketAddr> = clients.iter().map(addr_of).collect();
    assert_eq!(server.peer_addrs(), remaining);
    Ok(())
}

#[test]
fn every_other_peer_receives_each_message_once() -> Result<()> {
    let mut server = local_server()?;
    let mut peers = Vec::new();
    for expected in 1..=3 {
        peers.push(connect(&server)?);
        pump_until(&mut server, |s| s.peer_count() == expected)?;
    }
    // Clear join notices.
    for peer in peers.iter_mut() {
        drain_for(&mut server, peer, Duration::from_millis(30))?;
    }

    peers[1].write_all(b"from the middle")?;
    let origin = peers.remove(1);
    for peer in peers.iter_mut() {
        let heard = drain_for(&mut server, peer, Duration::from_millis(100))?;
        assert_eq!(heard, b"from the middle");
    }
    let mut origin = origin;
    assert!(drain_for(&mut server, &mut origin, Duration::from_millis(50))?.is_empty());
    Ok(())
}

#[test]
fn oversized_message_arrives_in_buffer_sized_chunks() -> Result<()> {
    let mut server = Server::bind(ServerConfig {
        endpoint: Endpoint::new("127.0.0.1", 0),
        buffer_capacity: 16,
        ..ServerConfig::default()
    })?;
    let mut sender = connect(&server)?;
    pump_until(&mut server, |s| s.peer_count() == 1)?;
    let mut receiver = connect(&server)?;
    pump_until(&mut server, |s| s.peer_count() == 2)?;
    drain_for(&mut server, &mut sender, Duration::from_millis(30))?;

    let payload: Vec<u8> = (0..200u8).collect();
    sender.write_all(&payload)?;

    let heard = pump_and_read(&mut server, &mut receiver, payload.len())?;
    assert_eq!(heard, payload);
    Ok(())
}

#[test]
fn shutdown_notifies_and_closes_every_peer() -> Result<()> {
    let mut server = local_server()?;
    let mut alice = connect(&server)?;
    pump_until(&mut server, |s| s.peer_count() == 1)?;
    let mut bob = connect(&server)?;
    pump_until(&mut server, |s| s.peer_count() == 2)?;
    drain_for(&mut server, &mut alice, Duration::from_millis(30))?;

    server.shutdown_handle().shutdown()?;
    assert_eq!(server.poll_once(PollMode::Blocking)?, Flow::Stopped);

    for client in [&mut alice, &mut bob] {
        client.set_read_timeout(Some(Duration::from_secs(1)))?;
        let mut received = Vec::new();
        client.read_to_end(&mut received)?;
        assert_eq!(String::from_utf8(received)?, SHUTDOWN_NOTICE);
    }
    assert_eq!(server.peer_count(), 0);
    assert!(TcpStream::connect(server.local_addr()).is_err());
    Ok(())
}

#[test]
fn run_returns_after_shutdown_from_another_thread() -> Result<()> {
    let server = local_server()?;
    let handle = server.shutdown_handle();
    let reactor = std::thread::spawn(move || server.run());

    std::thread::sleep(Duration::from_millis(20));
    handle.shutdown()?;
    reactor.join().expect("reactor thread")?;
    Ok(())
}

#[test]
fn peer_that_reset_is_pruned_on_write_and_others_still_served() -> Result<()> {
    let mut server = local_server()?;
    let mut sender = connect(&server)?;
    pump_until(&mut server, |s| s.peer_count() == 1)?;
    let gone = connect(&server)?;
    pump_until(&mut server, |s| s.peer_count() == 2)?;
    let mut third = connect(&server)?;
    pump_until(&mut server, |s| s.peer_count() == 3)?;
    drain_for(&mut server, &mut sender, Duration::from_millis(30))?;

    // Closing with the third peer's join notice unread makes the kernel
    // answer with a reset, so the server's next write to it fails.
    drop(gone);
    sender.write_all(b"still here?")?;
    std::thread::sleep(Duration::from_millis(100));

    // The sender sorts first, so its chunk hits the dead socket before the
    // close is read.
    server.poll_once(STEP)?;
    assert_eq!(server.peer_count(), 2);
    assert_eq!(server.peer_addrs(), vec![addr_of(&sender), addr_of(&third)]);

    // Pruned on write: no departure notice follows the payload.
    let heard = drain_for(&mut server, &mut third, Duration::from_millis(100))?;
    assert_eq!(heard, b"still here?");
    Ok(())
}
