//! Line-oriented chat front end.
//!
//! Reads commands and chat text from `input`, prints session events to `out`
//! and keeps the transcript in `AppContext` up to date.

use std::io::Write;

use tapchat_protocol::Message;
use tapchat_session::{Capabilities, PeerHandle, SessionError, SessionEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::error::RecvError;

use crate::context::AppContext;

const HELP: &str = "\
commands:
  <text>        send a chat message
  /search       browse for nearby peers
  /connect N    connect to peer N from the last search
  /disconnect   leave the current chat
  /peers        list the last search result
  /history      show this run's messages
  /quit         exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Empty,
    Say(String),
    Search,
    Connect(usize),
    Disconnect,
    Peers,
    History,
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_line(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ConsoleCommand::Say(line.to_string());
    };

    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("search"), None, _) => ConsoleCommand::Search,
        (Some("connect"), Some(n), None) => match n.parse() {
            Ok(n) => ConsoleCommand::Connect(n),
            Err(_) => ConsoleCommand::Unknown(line.to_string()),
        },
        (Some("disconnect"), None, _) => ConsoleCommand::Disconnect,
        (Some("peers"), None, _) => ConsoleCommand::Peers,
        (Some("history"), None, _) => ConsoleCommand::History,
        (Some("help"), _, _) => ConsoleCommand::Help,
        (Some("quit" | "exit"), _, _) => ConsoleCommand::Quit,
        _ => ConsoleCommand::Unknown(line.to_string()),
    }
}

/// First hint shown to the user, depending on what discovery can do.
pub fn guide_text(capabilities: Capabilities) -> &'static str {
    match (capabilities.triggered, capabilities.browse) {
        (true, true) => {
            "Tap another device running tapchat, or type /search to browse nearby peers."
        }
        (true, false) => "Tap another device running tapchat to start chatting.",
        (false, true) => "Type /search to browse nearby peers, then /connect N.",
        (false, false) => {
            "This device cannot discover peers. Enable triggered or browse in [discovery]."
        }
    }
}

/// Start the session, run until `/quit` or end of input, then stop it.
pub async fn run_console<R, W>(ctx: &mut AppContext, input: R, mut out: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut events = ctx.session.events();
    let mut lines = input.lines();

    writeln!(out, "{}", guide_text(ctx.session.capabilities()))?;
    if let Err(e) = ctx.session.start().await {
        writeln!(out, "* could not start discovery: {e}")?;
    }

    loop {
        tokio::select! {
            biased;

            event = events.recv() => {
                match event {
                    Ok(event) => handle_event(ctx, event, &mut out).await?,
                    Err(RecvError::Lagged(skipped)) => handle_lag(ctx, skipped, &mut out).await?,
                    Err(RecvError::Closed) => break,
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_line(ctx, &line, &mut out).await? {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    ctx.session.stop().await?;
    ctx.transcript.archive_all();
    Ok(())
}

/// Returns false once the user asked to quit.
async fn handle_line<W: Write>(
    ctx: &mut AppContext,
    line: &str,
    out: &mut W,
) -> anyhow::Result<bool> {
    match parse_line(line) {
        ConsoleCommand::Empty => {}
        ConsoleCommand::Quit => return Ok(false),
        ConsoleCommand::Help => writeln!(out, "{HELP}")?,
        ConsoleCommand::Say(text) => match ctx.session.send_message(text.clone()).await {
            Ok(()) => {
                let message = Message::outgoing(ctx.local_name(), text);
                ctx.transcript.push(message);
            }
            Err(SessionError::NotConnected) => {
                writeln!(out, "* not connected, {}", guide_text(ctx.session.capabilities()))?;
            }
            Err(e) => writeln!(out, "* send failed: {e}")?,
        },
        ConsoleCommand::Search => {
            // The result arrives as SearchFinished or ConnectivityProblem
            if let Err(e) = ctx.session.search().await {
                report(out, &e)?;
            }
        }
        ConsoleCommand::Connect(n) => {
            let peers = ctx.session.peers();
            match n.checked_sub(1).and_then(|i| peers.get(i)) {
                Some(peer) => {
                    writeln!(out, "* connecting to {}...", peer.display_name)?;
                    if let Err(e) = ctx.session.connect_to_peer(peer.clone()).await {
                        report(out, &e)?;
                    }
                }
                None => writeln!(out, "* no peer #{n}, run /search first")?,
            }
        }
        ConsoleCommand::Disconnect => {
            if !ctx.session.is_connected() {
                writeln!(out, "* not in a chat")?;
                return Ok(true);
            }
            ctx.session.disconnect().await?;
            end_conversation(ctx, out)?;
        }
        ConsoleCommand::Peers => print_peers(out, &ctx.session.peers())?,
        ConsoleCommand::History => {
            if ctx.transcript.is_empty() {
                writeln!(out, "* no messages yet")?;
            }
            for message in ctx.transcript.iter() {
                let marker = if message.archived { " " } else { "*" };
                writeln!(out, "{marker} {}: {}", message.sender_name, message.text)?;
            }
        }
        ConsoleCommand::Unknown(cmd) => writeln!(out, "* unknown command {cmd}, try /help")?,
    }
    Ok(true)
}

async fn handle_event<W: Write>(
    ctx: &mut AppContext,
    event: SessionEvent,
    out: &mut W,
) -> anyhow::Result<()> {
    tracing::debug!(event = event.name(), "console: session event");

    match event {
        SessionEvent::Connecting => writeln!(out, "* connecting...")?,
        SessionEvent::Connected => writeln!(out, "* connected, say hello")?,
        SessionEvent::PeerNameChanged(name) => writeln!(out, "* chatting with {name}")?,
        SessionEvent::MessageReceived(message) => {
            let sender = if message.sender_name.is_empty() {
                "peer"
            } else {
                message.sender_name.as_str()
            };
            writeln!(out, "{sender}: {}", message.text)?;
            ctx.transcript.push(message);
        }
        SessionEvent::ConnectionInterrupted(reason) => {
            writeln!(out, "* connection lost: {reason}")?;
            ctx.session.disconnect().await?;
            end_conversation(ctx, out)?;
        }
        SessionEvent::ConnectivityProblem(reason) => writeln!(out, "* problem: {reason}")?,
        SessionEvent::Searching => writeln!(out, "* searching...")?,
        SessionEvent::SearchFinished(peers) => {
            if peers.is_empty() {
                writeln!(
                    out,
                    "* no peers found, make sure the other device is running tapchat on this network"
                )?;
            } else {
                print_peers(out, &peers)?;
            }
        }
    }
    Ok(())
}

/// Skipped events are gone; the snapshot still says whether the stream broke.
async fn handle_lag<W: Write>(
    ctx: &mut AppContext,
    skipped: u64,
    out: &mut W,
) -> anyhow::Result<()> {
    tracing::warn!(skipped, "console: event receiver lagged");
    writeln!(out, "* missed {skipped} events, some messages may not be shown")?;

    if ctx.session.snapshot().interrupted {
        writeln!(out, "* connection lost")?;
        ctx.session.disconnect().await?;
        end_conversation(ctx, out)?;
    }
    Ok(())
}

fn end_conversation<W: Write>(ctx: &mut AppContext, out: &mut W) -> anyhow::Result<()> {
    let archived = ctx.transcript.archive_all();
    tracing::debug!(archived, "console: conversation ended");
    writeln!(out, "* chat ended, {}", guide_text(ctx.session.capabilities()))?;
    Ok(())
}

fn print_peers<W: Write>(out: &mut W, peers: &[PeerHandle]) -> std::io::Result<()> {
    if peers.is_empty() {
        return writeln!(out, "* no peers known, run /search");
    }
    for (i, peer) in peers.iter().enumerate() {
        writeln!(out, "  {}. {} ({})", i + 1, peer.display_name, peer.id)?;
    }
    Ok(())
}

/// Discovery failures are already printed from the ConnectivityProblem event.
fn report<W: Write>(out: &mut W, error: &SessionError) -> std::io::Result<()> {
    match error {
        SessionError::Discovery(_) => Ok(()),
        other => writeln!(out, "* {other}"),
    }
}
