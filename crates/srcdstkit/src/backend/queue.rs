//! Pending-event queue between a node watch and the dispatcher.
//!
//! Holds at most one event per node name. A newer event for a node that is
//! still waiting replaces the queued payload in place, keeping its position,
//! so a slow consumer never sees more entries than there are nodes.

use crate::types::{TriggerKind, WatchEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct State {
    order: VecDeque<String>,
    pending: HashMap<String, WatchEvent>,
    closed: bool,
}

/// Blocking multi-producer queue that merges events per node.
#[derive(Debug, Default)]
pub struct EventQueue {
    state: Mutex<State>,
    ready: Condvar,
}

impl EventQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event, merging it with one already waiting for the same node.
    ///
    /// A merged event keeps `Added` if either side was `Added` first, and
    /// carries the newest payload. Returns `false` once the queue is closed.
    pub fn push(&self, event: WatchEvent) -> bool {
        let key = event.node_name().unwrap_or_default().to_string();
        let mut state = self.lock();
        if state.closed {
            return false;
        }

        if let Some(waiting) = state.pending.get_mut(&key) {
            if waiting.kind != TriggerKind::Added {
                waiting.kind = event.kind;
            }
            waiting.payload = event.payload;
        } else {
            state.order.push_back(key.clone());
            state.pending.insert(key, event);
            self.ready.notify_one();
        }
        true
    }

    /// Drop the waiting event for a node, if any.
    pub fn discard(&self, name: &str) {
        let mut state = self.lock();
        if state.pending.remove(name).is_some() {
            state.order.retain(|key| key != name);
        }
    }

    /// Block until an event is available.
    ///
    /// After [`Self::close`], events still waiting are handed out, then
    /// `None`.
    pub fn pop(&self) -> Option<WatchEvent> {
        let mut state = self.lock();
        loop {
            while let Some(key) = state.order.pop_front() {
                if let Some(event) = state.pending.remove(&key) {
                    return Some(event);
                }
            }
            if state.closed {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stop accepting events and wake a blocked consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    /// Number of nodes with an event waiting.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
