use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::{
    hub::HubHandle,
    message::{ServerToClient, SessionId, write_message},
    queue::{OutboundQueue, OutboundReceiver},
};

static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

/// Caller-side reference to a registration.
///
/// Two registrations may share a `SessionId` when a caller reuses one; the
/// ticket tells them apart so a stale unregister cannot evict the newer slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    id: SessionId,
    ticket: u64,
    name: Arc<str>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            ticket: NEXT_TICKET.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn ticket(&self) -> u64 {
        self.ticket
    }
}

/// Hub-side state for one participant. Lives only inside the registry.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    outbound: OutboundQueue,
}

impl Session {
    pub(crate) fn new(handle: SessionHandle, outbound: OutboundQueue) -> Self {
        Self { handle, outbound }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn id(&self) -> SessionId {
        self.handle.id
    }

    pub(crate) fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    /// Closes the outbound queue. Safe to call more than once.
    pub(crate) fn close(&mut self) -> bool {
        self.outbound.close()
    }
}

/// Issues the session's unregister at most once, whichever path notices
/// the end first: read side, write side, or an explicit close.
#[derive(Debug)]
pub struct Teardown {
    hub: HubHandle,
    session: SessionHandle,
    fired: AtomicBool,
}

impl Teardown {
    pub fn new(hub: HubHandle, session: SessionHandle) -> Arc<Self> {
        Arc::new(Self {
            hub,
            session,
            fired: AtomicBool::new(false),
        })
    }

    /// Returns `true` for the one call that submitted the unregister.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.hub.unregister(&self.session);
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// Queue closed by the hub and every buffered message was written.
    Drained,
    /// The transport refused a write; the session was torn down.
    WriteFailed,
}

/// Writes queued messages to the transport in enqueue order until the hub
/// closes the queue or a write fails.
pub async fn send_pump<W>(
    mut outbound: OutboundReceiver,
    mut writer: W,
    teardown: Arc<Teardown>,
) -> PumpExit
where
    W: AsyncWrite + Unpin,
{
    let session = teardown.session().id();

    while let Some(message) = outbound.recv().await {
        let frame = ServerToClient::from(message.as_ref());
        if let Err(error) = write_message(&mut writer, &frame).await {
            debug!(%session, ?error, "write failed, tearing session down");
            teardown.fire();
            return PumpExit::WriteFailed;
        }
    }

    trace!(%session, "outbound queue drained");
    if let Err(error) = writer.shutdown().await {
        debug!(%session, ?error, "failed to shut down writer");
    }
    PumpExit::Drained
}
