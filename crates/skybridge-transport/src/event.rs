use std::sync::mpsc::{self, Receiver, Sender};

/// Delivers service notifications to whoever holds the receiving end.
///
/// Emitting never blocks and never fails the caller: once the receiver is
/// gone, events are dropped.
#[derive(Debug)]
pub struct EventSink<E> {
    tx: Option<Sender<E>>,
}

impl<E> EventSink<E> {
    /// Sink that forwards into `tx`.
    pub fn new(tx: Sender<E>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: E) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::trace!("event receiver dropped");
            }
        }
    }
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E> Default for EventSink<E> {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Create a connected sink/receiver pair.
pub fn event_channel<E>() -> (EventSink<E>, Receiver<E>) {
    let (tx, rx) = mpsc::channel();
    (EventSink::new(tx), rx)
}
