use std::{
    io::{self, BufRead, Write},
    sync::Arc,
    thread,
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use mio::Waker;
use tracing::{debug, warn};

use crate::{
    cli::ClientArgs,
    config::SessionConfig,
    error::Error,
    message,
    session::{Inbound, Session},
};

/// Something the local user did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalInput {
    Line(String),
    Quit,
}

/// Why [`drive`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    RemoteClosed,
    UserQuit,
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let config = SessionConfig::from(args);
    let session = match Session::connect(config.clone()) {
        Ok(session) => session,
        Err(err) => {
            write_stdout(&format!(
                "Unable to connect to {} at port {}",
                config.endpoint.host, config.endpoint.port
            ))?;
            return Err(err).context("failed to start chat session");
        }
    };

    write_stdout(&format!(
        "Connected to {} at port {}. You can start sending messages.",
        config.endpoint.host, config.endpoint.port
    ))?;
    write_stdout(&format!(
        "*** {} chatting with {}",
        config.username, config.partner_name
    ))?;

    let (input_tx, input_rx) = unbounded();
    spawn_stdin_pump(input_tx.clone(), session.waker());
    let ctrl_c = tokio::spawn(forward_ctrl_c(input_tx, session.waker()));

    let ending = tokio::task::spawn_blocking(move || {
        let mut session = session;
        let mut stdout = io::stdout();
        drive(&mut session, &input_rx, &mut stdout)
    })
    .await
    .context("client loop panicked")??;
    ctrl_c.abort();

    match ending {
        Ending::RemoteClosed => write_stdout("Disconnected from chat server - session ending.")?,
        Ending::UserQuit => write_stdout("Leaving chat session.")?,
    }
    Ok(())
}

/// Client reactor loop.
///
/// Each iteration hands every queued local line to the server, then waits a
/// bounded time for the server and shows whatever arrived. Local input wakes
/// the wait early through the session waker. A send that finds the server
/// gone leaves the rest of the input queued; the receive that follows reports
/// the close.
pub fn drive<W: Write>(
    session: &mut Session,
    input: &Receiver<LocalInput>,
    display: &mut W,
) -> crate::error::Result<Ending> {
    loop {
        loop {
            match input.try_recv() {
                Ok(LocalInput::Line(line)) => {
                    match session.send_bytes(&message::encode_line(&line)) {
                        Ok(()) => {}
                        Err(Error::Disconnected) => break,
                        Err(err) => return Err(err),
                    }
                }
                Ok(LocalInput::Quit) | Err(TryRecvError::Disconnected) => {
                    session.close();
                    return Ok(Ending::UserQuit);
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match session.receive()? {
            Inbound::Idle => {}
            Inbound::Message(text) => {
                writeln!(display, "{}", message::display_text(&text))?;
                display.flush()?;
            }
            Inbound::Closed => return Ok(Ending::RemoteClosed),
        }
    }
}

/// Reads stdin lines on a plain thread so a blocked read never holds up
/// process exit.
fn spawn_stdin_pump(tx: Sender<LocalInput>, waker: Arc<Waker>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let input = match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("/quit") => LocalInput::Quit,
                Ok(line) => LocalInput::Line(line),
                Err(error) => {
                    warn!(?error, "failed to read stdin");
                    break;
                }
            };
            let quit = input == LocalInput::Quit;
            if !push(&tx, &waker, input) || quit {
                return;
            }
        }
        push(&tx, &waker, LocalInput::Quit);
    });
}

async fn forward_ctrl_c(tx: Sender<LocalInput>, waker: Arc<Waker>) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(?error, "ctrl-c handler failed");
        return;
    }
    push(&tx, &waker, LocalInput::Quit);
}

fn push(tx: &Sender<LocalInput>, waker: &Waker, input: LocalInput) -> bool {
    if tx.send(input).is_err() {
        return false;
    }
    if let Err(error) = waker.wake() {
        debug!(?error, "failed to wake client loop");
    }
    true
}

fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(line.as_bytes())?;
    stdout.write_all(b"\n")?;
    stdout.flush()
}
