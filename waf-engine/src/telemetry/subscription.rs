//! Live listener handles

use super::stream::Shared;
use crate::model::LogEntry;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Undelivered entries a listener may accumulate before the oldest are dropped
pub const DEFAULT_BACKLOG: usize = 10_000;

#[derive(Debug, Default)]
struct ListenerState {
    paused: bool,
    closed: bool,
    /// Delivered, not yet received
    ready: VecDeque<LogEntry>,
    /// Appended while paused, released on resume
    held: VecDeque<LogEntry>,
    /// Entries dropped because the backlog was full, since last reported
    lagged: u64,
}

enum Next {
    Entry(LogEntry),
    Empty,
    Closed,
}

/// Stream-side half of a subscription
#[derive(Debug)]
pub(crate) struct Listener {
    id: u64,
    backlog: usize,
    state: Mutex<ListenerState>,
    notify: Notify,
}

impl Listener {
    pub(crate) fn new(id: u64, backlog: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            backlog: backlog.max(1),
            state: Mutex::new(ListenerState::default()),
            notify: Notify::new(),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by the stream for every append, in append order.
    ///
    /// A full backlog drops its oldest entry, released ones first.
    pub(crate) fn deliver(&self, entry: &LogEntry) {
        let mut state = self.lock();
        if state.ready.len() + state.held.len() >= self.backlog {
            if state.ready.pop_front().is_none() {
                state.held.pop_front();
            }
            if state.lagged == 0 {
                warn!("Subscriber {} backlog full, dropping oldest entries", self.id);
            }
            state.lagged += 1;
        }

        if state.paused {
            state.held.push_back(entry.clone());
        } else {
            state.ready.push_back(entry.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Called once the stream itself is gone
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    fn pause(&self) {
        self.lock().paused = true;
    }

    fn resume(&self) {
        let mut state = self.lock();
        let released = state.held.len();
        let held = std::mem::take(&mut state.held);
        state.ready.extend(held);
        state.paused = false;
        drop(state);

        self.notify.notify_one();
        debug!("Subscriber {} resumed, released {} held entries", self.id, released);
    }

    fn is_paused(&self) -> bool {
        self.lock().paused
    }

    fn pop(&self) -> Next {
        let mut state = self.lock();
        match state.ready.pop_front() {
            Some(entry) => Next::Entry(entry),
            None if state.closed => Next::Closed,
            None => Next::Empty,
        }
    }

    fn take_lagged(&self) -> u64 {
        std::mem::take(&mut self.lock().lagged)
    }
}

/// Handle to a live tail of the telemetry stream.
///
/// Entries arrive in append order without duplicates. Pausing holds back
/// delivery for this handle only. A handle that falls more than its backlog
/// behind loses the oldest undelivered entries; [`Subscription::take_lagged`]
/// reports how many. Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    listener: Arc<Listener>,
    stream: Weak<Shared>,
}

impl Subscription {
    pub(crate) fn new(listener: Arc<Listener>, stream: Weak<Shared>) -> Self {
        Self { listener, stream }
    }

    pub fn id(&self) -> u64 {
        self.listener.id()
    }

    /// Wait for the next delivered entry; `None` once the stream is gone
    pub async fn recv(&mut self) -> Option<LogEntry> {
        loop {
            match self.listener.pop() {
                Next::Entry(entry) => return Some(entry),
                Next::Closed => return None,
                Next::Empty => self.listener.notify.notified().await,
            }
        }
    }

    /// Take the next delivered entry without waiting
    pub fn try_recv(&mut self) -> Option<LogEntry> {
        match self.listener.pop() {
            Next::Entry(entry) => Some(entry),
            Next::Empty | Next::Closed => None,
        }
    }

    pub fn pause(&self) {
        self.listener.pause();
        debug!("Subscriber {} paused", self.id());
    }

    /// Resume delivery, first releasing everything appended while paused
    pub fn resume(&self) {
        self.listener.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.listener.is_paused()
    }

    /// Entries dropped since the last call because the backlog was full
    pub fn take_lagged(&self) -> u64 {
        self.listener.take_lagged()
    }

    /// Stop delivery immediately
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.upgrade() {
            stream.detach(self.listener.id());
        }
    }
}
