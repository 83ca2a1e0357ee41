//! Ring buffer of recent decisions with live fan-out

use super::subscription::{Listener, Subscription, DEFAULT_BACKLOG};
use crate::model::LogEntry;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Entries kept when no capacity is configured
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug)]
struct StreamState {
    buffer: VecDeque<LogEntry>,
    capacity: usize,
    listeners: Vec<Arc<Listener>>,
}

#[derive(Debug)]
pub(crate) struct Shared {
    state: RwLock<StreamState>,
    next_listener: AtomicU64,
    backlog: usize,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, StreamState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StreamState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn detach(&self, listener_id: u64) {
        let mut state = self.write();
        state.listeners.retain(|listener| listener.id() != listener_id);
        debug!("Subscriber {} detached", listener_id);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for listener in &state.listeners {
            listener.close();
        }
    }
}

/// Bounded, append-only log of decisions that can be tailed live.
///
/// Append, eviction and delivery to listeners happen under one write lock, so
/// readers never see the buffer over capacity and every listener observes
/// entries in buffer order. Pausing a listener only holds back its delivery;
/// the buffer keeps recording.
#[derive(Debug, Clone)]
pub struct TelemetryStream {
    shared: Arc<Shared>,
}

impl TelemetryStream {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a stream holding at most `capacity` entries (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_limits(capacity, DEFAULT_BACKLOG)
    }

    /// Like [`with_capacity`](Self::with_capacity), also bounding how many
    /// undelivered entries each subscriber may accumulate
    pub fn with_limits(capacity: usize, backlog: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(StreamState {
                    buffer: VecDeque::with_capacity(capacity),
                    capacity,
                    listeners: Vec::new(),
                }),
                next_listener: AtomicU64::new(1),
                backlog: backlog.max(1),
            }),
        }
    }

    /// Add an entry at the tail, evicting the oldest entry when full
    pub fn append(&self, entry: LogEntry) {
        let mut state = self.shared.write();
        if state.buffer.len() == state.capacity {
            state.buffer.pop_front();
        }
        for listener in &state.listeners {
            listener.deliver(&entry);
        }
        state.buffer.push_back(entry);
    }

    /// Current contents, oldest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.shared.read().buffer.iter().cloned().collect()
    }

    /// Drop all buffered entries. Listeners stay attached.
    pub fn clear(&self) {
        let mut state = self.shared.write();
        let dropped = state.buffer.len();
        state.buffer.clear();
        debug!("Cleared {} telemetry entries", dropped);
    }

    /// Attach a live listener that receives every entry appended from now on
    pub fn subscribe(&self) -> Subscription {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener = Listener::new(id, self.shared.backlog);
        self.shared.write().listeners.push(listener.clone());
        debug!("Subscriber {} attached", id);
        Subscription::new(listener, Arc::downgrade(&self.shared))
    }

    pub fn len(&self) -> usize {
        self.shared.read().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.read().capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.read().listeners.len()
    }
}

impl Default for TelemetryStream {
    fn default() -> Self {
        Self::new()
    }
}
