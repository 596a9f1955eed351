//! Bridges one duplex transport to the hub.
//!
//! The adapter is the only code that sees both the wire and the hub. It
//! registers a session once the hello handshake succeeds, turns each inbound
//! chat frame into a broadcast, hands the write half to a send-pump, and
//! makes sure exactly one unregister is issued when the connection ends.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    select,
    task::{JoinError, JoinHandle},
    time::timeout,
};
use tracing::{debug, info, trace, warn};

use crate::{
    hub::HubHandle,
    message::{ClientToServer, ServerToClient, SessionId, read_message, write_message},
    session::{PumpExit, Teardown, send_pump},
};

/// How long a closed session's pump may keep flushing before it is aborted.
pub const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting,
    Active,
    /// Queue closing, pump flushing what is left.
    Draining,
    Closed,
}

impl ConnectionState {
    /// Moves to `next` if it lies ahead. Returns whether anything changed.
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if next <= *self {
            return false;
        }
        *self = next;
        true
    }
}

/// Serves one connection until the peer hangs up, the transport fails, or
/// the hub closes the session's queue.
pub async fn serve_connection<R, W>(hub: HubHandle, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    serve_with_grace(hub, reader, writer, DRAIN_GRACE).await
}

pub(crate) async fn serve_with_grace<R, W>(
    hub: HubHandle,
    mut reader: R,
    mut writer: W,
    drain_grace: Duration,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut state = ConnectionState::Connecting;

    let nickname = perform_handshake(&mut reader, &mut writer).await?;
    let id = SessionId::next();
    let registration = match hub.register(id, nickname.as_str()) {
        Ok(registration) => registration,
        Err(err) => {
            reject(&mut writer, "server is shutting down").await?;
            return Err(err).context("hub refused registration");
        }
    };
    let (session, outbound) = registration.into_parts();
    let teardown = Teardown::new(hub.clone(), session.clone());

    let welcome = ServerToClient::Welcome {
        nickname: nickname.clone(),
        session: id,
    };
    if let Err(err) = write_message(&mut writer, &welcome).await {
        teardown.fire();
        return Err(err).context("failed to send welcome");
    }

    let mut pump = tokio::spawn(send_pump(outbound, writer, Arc::clone(&teardown)));
    state.advance(ConnectionState::Active);
    info!(session = %id, %nickname, "session joined");

    let mut pump_result = None;
    let outcome = loop {
        select! {
            exit = &mut pump => {
                pump_result = Some(exit);
                break Ok(());
            }
            inbound = read_message::<_, ClientToServer>(&mut reader) => match inbound {
                Ok(Some(ClientToServer::Chat { text })) => {
                    if text.trim().is_empty() {
                        continue;
                    }
                    if hub.broadcast(&session, text).is_err() {
                        debug!(session = %id, "hub stopped while session was active");
                        break Ok(());
                    }
                }
                Ok(Some(ClientToServer::Hello { .. })) => {
                    debug!(session = %id, "ignoring repeated hello");
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        }
    };

    // A finished pump leaves nothing to flush.
    state.advance(if pump_result.is_some() {
        ConnectionState::Closed
    } else {
        ConnectionState::Draining
    });
    teardown.fire();

    if state == ConnectionState::Draining {
        trace!(session = %id, "connection draining");
        pump_result = drain_pump(&mut pump, drain_grace).await;
        if pump_result.is_none() {
            warn!(session = %id, ?drain_grace, "peer stopped reading, send pump aborted");
        }
    }
    match pump_result {
        Some(Ok(PumpExit::Drained)) | None => {}
        Some(Ok(PumpExit::WriteFailed)) => debug!(session = %id, "peer stopped accepting writes"),
        Some(Err(err)) => warn!(session = %id, error = ?err, "send pump failed"),
    }

    if state.advance(ConnectionState::Closed) {
        trace!(session = %id, "drain finished");
    }
    info!(session = %id, %nickname, "session closed");

    outcome.context("transport read failed")
}

/// Waits up to `grace` for the pump to flush. A write stuck on a peer that
/// no longer reads cannot see the queue close, so it is aborted instead.
async fn drain_pump(
    pump: &mut JoinHandle<PumpExit>,
    grace: Duration,
) -> Option<Result<PumpExit, JoinError>> {
    match timeout(grace, &mut *pump).await {
        Ok(result) => Some(result),
        Err(_) => {
            pump.abort();
            let _ = pump.await;
            None
        }
    }
}

async fn perform_handshake<R, W>(reader: &mut R, writer: &mut W) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let hello = match read_message::<_, ClientToServer>(reader).await? {
        Some(message) => message,
        None => anyhow::bail!("connection closed before handshake"),
    };

    let nickname = match hello {
        ClientToServer::Hello { nickname } => nickname.trim().to_string(),
        ClientToServer::Chat { .. } => {
            reject(writer, "expected hello first").await?;
            anyhow::bail!("expected hello message first");
        }
    };

    if nickname.is_empty() {
        reject(writer, "nickname cannot be empty").await?;
        anyhow::bail!("nickname cannot be empty");
    }

    Ok(nickname)
}

async fn reject<W>(writer: &mut W, reason: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_message(
        writer,
        &ServerToClient::Error {
            message: reason.to_string(),
        },
    )
    .await?;
    Ok(())
}
