//! Bounded per-session buffer between the hub's fan-out and a send-pump.
//!
//! Delivery through the queue is at-most-once with no retry: when the
//! buffer is full the message is dropped for that one recipient instead of
//! making the hub wait on a slow consumer.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::message::Message;

/// Creates a queue holding at most `capacity` pending messages.
pub fn outbound_queue(capacity: usize) -> (OutboundQueue, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (OutboundQueue { tx: Some(tx) }, OutboundReceiver { rx })
}

/// Producer half. Owned by the hub's registry and nothing else, so closing
/// it is the only way a send-pump learns its session is over.
#[derive(Debug)]
pub struct OutboundQueue {
    tx: Option<mpsc::Sender<Arc<Message>>>,
}

impl OutboundQueue {
    /// Never waits. Returns `false` if the queue is full or closed.
    pub fn enqueue(&self, message: Arc<Message>) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Returns `true` only for the call that actually closed the queue.
    pub fn close(&mut self) -> bool {
        self.tx.take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(|tx| tx.is_closed())
    }
}

/// Consumer half, drained by the session's send-pump.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<Arc<Message>>,
}

impl OutboundReceiver {
    /// Yields buffered messages, then `None` once the queue is closed and empty.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> Arc<Message> {
        Arc::new(Message::new("tester", text))
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let (queue, mut rx) = outbound_queue(2);
        assert!(queue.enqueue(msg("one")));
        assert!(queue.enqueue(msg("two")));
        assert!(!queue.enqueue(msg("three")));

        assert_eq!(rx.try_recv().as_deref().map(Message::text), Some("one"));
        assert!(queue.enqueue(msg("four")));
        assert_eq!(rx.try_recv().as_deref().map(Message::text), Some("two"));
        assert_eq!(rx.try_recv().as_deref().map(Message::text), Some("four"));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let (mut queue, mut rx) = outbound_queue(4);
        assert!(queue.enqueue(msg("a")));
        assert!(queue.enqueue(msg("b")));

        assert!(queue.close());
        assert!(!queue.close(), "second close is a no-op");
        assert!(queue.is_closed());
        assert!(!queue.enqueue(msg("late")));

        assert_eq!(rx.recv().await.as_deref().map(Message::text), Some("a"));
        assert_eq!(rx.recv().await.as_deref().map(Message::text), Some("b"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn dropped_receiver_counts_as_closed() {
        let (queue, rx) = outbound_queue(1);
        drop(rx);
        assert!(queue.is_closed());
        assert!(!queue.enqueue(msg("nobody home")));
    }
}
