use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use skybridge_transport::EventSink;
use tracing::info;

use crate::event::StreamEvent;

/// Default number of simultaneous viewers.
pub const DEFAULT_MAX_CLIENTS: usize = 4;

/// Lifecycle of one viewer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Accepted,
    HeaderSent,
    Streaming,
    Closed,
}

/// Bookkeeping for one connected viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: u32,
    pub addr: SocketAddr,
    pub state: ClientState,
    pub connected_at: Instant,
    pub frames_sent: u64,
    pub bytes_sent: u64,
}

impl ClientInfo {
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

struct Slot {
    info: ClientInfo,
    cancel: Arc<AtomicBool>,
}

struct SlotTable {
    slots: Vec<Option<Slot>>,
    next_id: u32,
}

/// Fixed table of viewer slots.
///
/// A slot is held by a [`SlotGuard`] and released when the guard drops,
/// whichever way the session ends.
#[derive(Clone)]
pub struct ClientSlots {
    table: Arc<Mutex<SlotTable>>,
    events: EventSink<StreamEvent>,
}

fn lock(table: &Mutex<SlotTable>) -> MutexGuard<'_, SlotTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ClientSlots {
    pub fn new(max_clients: usize, events: EventSink<StreamEvent>) -> Self {
        Self {
            table: Arc::new(Mutex::new(SlotTable {
                slots: std::iter::repeat_with(|| None).take(max_clients).collect(),
                next_id: 1,
            })),
            events,
        }
    }

    /// Claim a free slot for `addr`, or `None` when all are taken.
    pub fn claim(&self, addr: SocketAddr) -> Option<SlotGuard> {
        let cancel = Arc::new(AtomicBool::new(false));
        let id = {
            let mut table = lock(&self.table);
            let index = table.slots.iter().position(Option::is_none)?;
            let id = table.next_id;
            table.next_id = table.next_id.wrapping_add(1).max(1);
            table.slots[index] = Some(Slot {
                info: ClientInfo {
                    id,
                    addr,
                    state: ClientState::Accepted,
                    connected_at: Instant::now(),
                    frames_sent: 0,
                    bytes_sent: 0,
                },
                cancel: Arc::clone(&cancel),
            });
            id
        };

        info!(client = id, %addr, "stream client connected");
        self.events.emit(StreamEvent::ClientConnected { id, addr });
        Some(SlotGuard {
            table: Arc::clone(&self.table),
            events: self.events.clone(),
            cancel,
            id,
            addr,
        })
    }

    /// Ask the session holding `id` to end. False when no such session exists.
    pub fn cancel(&self, id: u32) -> bool {
        let table = lock(&self.table);
        match table.slots.iter().flatten().find(|slot| slot.info.id == id) {
            Some(slot) => {
                slot.cancel.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> usize {
        lock(&self.table).slots.iter().flatten().count()
    }

    pub fn capacity(&self) -> usize {
        lock(&self.table).slots.len()
    }

    pub fn snapshot(&self) -> Vec<ClientInfo> {
        lock(&self.table)
            .slots
            .iter()
            .flatten()
            .map(|slot| slot.info.clone())
            .collect()
    }
}

/// Ownership of one viewer slot.
pub struct SlotGuard {
    table: Arc<Mutex<SlotTable>>,
    events: EventSink<StreamEvent>,
    cancel: Arc<AtomicBool>,
    id: u32,
    addr: SocketAddr,
}

impl SlotGuard {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Set once [`ClientSlots::cancel`] targeted this session.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn set_state(&self, state: ClientState) {
        self.update(|info| info.state = state);
    }

    pub fn record_frame(&self, bytes: usize) {
        self.update(|info| {
            info.frames_sent += 1;
            info.bytes_sent += bytes as u64;
        });
    }

    fn update(&self, f: impl FnOnce(&mut ClientInfo)) {
        let mut table = lock(&self.table);
        if let Some(slot) = table
            .slots
            .iter_mut()
            .flatten()
            .find(|slot| slot.info.id == self.id)
        {
            f(&mut slot.info);
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut table = lock(&self.table);
            if let Some(slot) = table
                .slots
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|slot| slot.info.id == self.id))
            {
                *slot = None;
            }
        }
        info!(client = self.id, addr = %self.addr, "stream client disconnected");
        self.events.emit(StreamEvent::ClientDisconnected {
            id: self.id,
            addr: self.addr,
        });
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use skybridge_transport::event_channel;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 2], port))
    }

    #[test]
    fn claims_up_to_capacity() {
        let slots = ClientSlots::new(2, EventSink::disabled());
        let a = slots.claim(addr(1)).unwrap();
        let b = slots.claim(addr(2)).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(slots.claim(addr(3)).is_none());
        assert_eq!(slots.active(), 2);
    }

    #[test]
    fn dropped_guard_frees_its_slot() {
        let slots = ClientSlots::new(1, EventSink::disabled());
        let first = slots.claim(addr(1)).unwrap();
        assert!(slots.claim(addr(2)).is_none());

        drop(first);
        assert_eq!(slots.active(), 0);
        let reused = slots.claim(addr(2)).unwrap();
        assert_eq!(reused.addr(), addr(2));
        assert_eq!(reused.id(), 2);
    }

    #[test]
    fn guard_releases_on_panic() {
        let slots = ClientSlots::new(1, EventSink::disabled());
        let worker_slots = slots.clone();
        let result = std::thread::spawn(move || {
            let _guard = worker_slots.claim(addr(1)).unwrap();
            panic!("serving loop blew up");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(slots.active(), 0);
    }

    #[test]
    fn connect_and_disconnect_notify_once() {
        let (sink, rx) = event_channel();
        let slots = ClientSlots::new(1, sink);
        let guard = slots.claim(addr(7)).unwrap();
        let id = guard.id();
        drop(guard);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::ClientConnected { id, addr: addr(7) },
                StreamEvent::ClientDisconnected { id, addr: addr(7) },
            ]
        );
    }

    #[test]
    fn cancel_reaches_only_the_named_session() {
        let slots = ClientSlots::new(2, EventSink::disabled());
        let first = slots.claim(addr(1)).unwrap();
        let second = slots.claim(addr(2)).unwrap();

        assert!(slots.cancel(second.id()));
        assert!(second.is_cancelled());
        assert!(!first.is_cancelled());

        let gone = second.id();
        drop(second);
        assert!(!slots.cancel(gone));
        assert_eq!(slots.active(), 1);
    }

    #[test]
    fn progress_is_visible_in_snapshot() {
        let slots = ClientSlots::new(2, EventSink::disabled());
        let guard = slots.claim(addr(1)).unwrap();
        guard.set_state(ClientState::Streaming);
        guard.record_frame(1000);
        guard.record_frame(500);

        let snapshot = slots.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, ClientState::Streaming);
        assert_eq!(snapshot[0].frames_sent, 2);
        assert_eq!(snapshot[0].bytes_sent, 1500);
    }
}
