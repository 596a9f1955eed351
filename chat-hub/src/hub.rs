//! The hub: one control loop that owns the session registry.
//!
//! Stream adapters never touch the registry. They submit [`ControlEvent`]s
//! through a [`HubHandle`] and the loop applies them one at a time, so
//! registrations, removals and broadcast fan-outs are totally ordered with
//! respect to each other without any lock around the map.

use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, trace};

use crate::{
    config::HubConfig,
    message::{Message, SessionId},
    queue::{OutboundReceiver, outbound_queue},
    session::{Session, SessionHandle},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("hub control loop has stopped")]
    Closed,
}

/// Everything the control loop can be asked to do.
#[derive(Debug)]
pub enum ControlEvent {
    Register(Session),
    Unregister(SessionHandle),
    Broadcast {
        message: Arc<Message>,
        origin: SessionHandle,
    },
    Snapshot {
        respond_to: oneshot::Sender<HubSnapshot>,
    },
    Shutdown,
}

/// Point-in-time view of the registry, ordered with all other events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubSnapshot {
    /// Registered sessions, sorted by id.
    pub sessions: Vec<SessionId>,
    pub broadcasts: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Outcome of one broadcast fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: Vec<SessionId>,
    pub dropped: Vec<SessionId>,
}

/// Live sessions keyed by id. Only the control loop holds one.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<SessionId, Session>,
    broadcasts: u64,
    delivered: u64,
    dropped: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last writer wins on an id collision; the displaced session's queue is
    /// closed and it is returned to the caller.
    pub fn register(&mut self, session: Session) -> Option<Session> {
        let mut replaced = self.sessions.insert(session.id(), session)?;
        replaced.close();
        Some(replaced)
    }

    /// Removes the exact registration behind `handle`, closing its queue.
    /// Unknown or already removed sessions are ignored.
    pub fn unregister(&mut self, handle: &SessionHandle) -> bool {
        let matches = self
            .sessions
            .get(&handle.id())
            .is_some_and(|session| session.handle().ticket() == handle.ticket());
        if !matches {
            return false;
        }

        match self.sessions.remove(&handle.id()) {
            Some(mut session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Offers `message` to every session except `origin`. A full queue loses
    /// this one message; nobody else is affected.
    pub fn broadcast(&mut self, message: Arc<Message>, origin: &SessionHandle) -> FanOut {
        let mut fan_out = FanOut::default();

        for (id, session) in &self.sessions {
            if *id == origin.id() {
                continue;
            }
            if session.outbound().enqueue(Arc::clone(&message)) {
                fan_out.delivered.push(*id);
            } else {
                fan_out.dropped.push(*id);
            }
        }

        self.broadcasts += 1;
        self.delivered += fan_out.delivered.len() as u64;
        self.dropped += fan_out.dropped.len() as u64;
        fan_out
    }

    /// Closes and forgets every session.
    pub fn close_all(&mut self) -> usize {
        let count = self.sessions.len();
        for (_, mut session) in self.sessions.drain() {
            session.close();
        }
        count
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn snapshot(&self) -> HubSnapshot {
        let mut sessions: Vec<_> = self.sessions.keys().copied().collect();
        sessions.sort_unstable();
        HubSnapshot {
            sessions,
            broadcasts: self.broadcasts,
            delivered: self.delivered,
            dropped: self.dropped,
        }
    }
}

/// A registered session as seen by its stream adapter.
#[derive(Debug)]
pub struct Registration {
    handle: SessionHandle,
    outbound: OutboundReceiver,
}

impl Registration {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn outbound(&mut self) -> &mut OutboundReceiver {
        &mut self.outbound
    }

    pub fn into_parts(self) -> (SessionHandle, OutboundReceiver) {
        (self.handle, self.outbound)
    }
}

/// Cloneable submission side of the control loop.
///
/// Every method only enqueues an event, so none of them wait on the loop
/// except [`HubHandle::snapshot`], which waits for its reply.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<ControlEvent>,
    config: HubConfig,
}

impl HubHandle {
    pub fn register(
        &self,
        id: SessionId,
        name: impl Into<Arc<str>>,
    ) -> Result<Registration, HubError> {
        let (queue, outbound) = outbound_queue(self.config.queue_capacity());
        let handle = SessionHandle::new(id, name);
        self.submit(ControlEvent::Register(Session::new(handle.clone(), queue)))?;
        Ok(Registration { handle, outbound })
    }

    /// Fire-and-forget. A stopped hub has nothing left to remove.
    pub fn unregister(&self, session: &SessionHandle) {
        if self
            .submit(ControlEvent::Unregister(session.clone()))
            .is_err()
        {
            trace!(session = %session.id(), "unregister after hub stopped");
        }
    }

    pub fn broadcast(&self, origin: &SessionHandle, text: impl Into<String>) -> Result<(), HubError> {
        let message = Arc::new(Message::new(origin.name(), text));
        self.submit(ControlEvent::Broadcast {
            message,
            origin: origin.clone(),
        })
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.submit(ControlEvent::Snapshot { respond_to })?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Asks the loop to close every session queue and stop.
    pub fn shutdown(&self) {
        let _ = self.submit(ControlEvent::Shutdown);
    }

    fn submit(&self, event: ControlEvent) -> Result<(), HubError> {
        self.events.send(event).map_err(|_| HubError::Closed)
    }
}

pub struct Hub {
    registry: Registry,
    events: mpsc::UnboundedReceiver<ControlEvent>,
}

impl Hub {
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            registry: Registry::new(),
            events: rx,
        };
        (hub, HubHandle { events: tx, config })
    }

    /// Starts the control loop on the current runtime.
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Runs until [`ControlEvent::Shutdown`] or until every handle is gone.
    pub async fn run(mut self) {
        debug!("hub control loop started");
        while let Some(event) = self.events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        self.events.close();
        let closed = self.registry.close_all();
        info!(sessions = closed, "hub control loop stopped");
    }

    fn handle_event(&mut self, event: ControlEvent) -> bool {
        match event {
            ControlEvent::Register(session) => {
                let id = session.id();
                if let Some(replaced) = self.registry.register(session) {
                    debug!(session = %id, name = replaced.handle().name(), "replaced session with same id");
                }
                debug!(session = %id, online = self.registry.len(), "session registered");
            }
            ControlEvent::Unregister(handle) => {
                if self.registry.unregister(&handle) {
                    debug!(session = %handle.id(), online = self.registry.len(), "session unregistered");
                } else {
                    trace!(session = %handle.id(), "unregister ignored");
                }
            }
            ControlEvent::Broadcast { message, origin } => {
                let fan_out = self.registry.broadcast(message, &origin);
                for id in &fan_out.dropped {
                    debug!(session = %id, origin = %origin.id(), "outbound queue full, message dropped");
                }
                trace!(
                    origin = %origin.id(),
                    delivered = fan_out.delivered.len(),
                    dropped = fan_out.dropped.len(),
                    "broadcast fanned out"
                );
            }
            ControlEvent::Snapshot { respond_to } => {
                let _ = respond_to.send(self.registry.snapshot());
            }
            ControlEvent::Shutdown => {
                info!(online = self.registry.len(), "hub shutting down");
                return false;
            }
        }
        true
    }
}
