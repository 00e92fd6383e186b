//! Throttled fan-out of status snapshots to registered observers.
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{
    runtime::Handle,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::debug;

use crate::{constants::BROADCAST_INTERVAL, status::ServiceStatus};

/// Receives status snapshots from a [`StatusBroadcaster`].
pub trait StatusObserver: Send + Sync {
    /// Called with the latest snapshot. Must not block.
    fn on_status(&self, status: &ServiceStatus);

    /// Inactive observers are skipped and do not keep broadcasting alive.
    fn is_active(&self) -> bool {
        true
    }
}

/// Handle returned by [`StatusBroadcaster::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Observer forwarding snapshots into an unbounded channel.
///
/// It reports itself inactive once the receiving half is dropped.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: UnboundedSender<ServiceStatus>,
}

impl ChannelObserver {
    pub fn new() -> (Self, UnboundedReceiver<ServiceStatus>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusObserver for ChannelObserver {
    fn on_status(&self, status: &ServiceStatus) {
        let _ = self.tx.send(status.clone());
    }

    fn is_active(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[derive(Default)]
struct BroadcastState {
    observers: Vec<(ObserverId, Arc<dyn StatusObserver>)>,
    next_id: u64,
    last_sent: Option<Instant>,
    pending: Option<JoinHandle<()>>,
    latest: Option<ServiceStatus>,
}

impl BroadcastState {
    fn active_observers(&self) -> Vec<Arc<dyn StatusObserver>> {
        self.observers
            .iter()
            .filter(|(_, observer)| observer.is_active())
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

/// Notifies observers of status changes, at most once per interval.
///
/// Updates arriving inside the interval are coalesced into a single deferred send carrying the
/// newest snapshot. With no active observers nothing is sent and any deferred send is cancelled.
#[derive(Clone)]
pub struct StatusBroadcaster {
    state: Arc<Mutex<BroadcastState>>,
    interval: Duration,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(BROADCAST_INTERVAL)
    }
}

impl StatusBroadcaster {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BroadcastState::default())),
            interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BroadcastState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers an observer.
    pub fn attach(&self, observer: Arc<dyn StatusObserver>) -> ObserverId {
        let mut state = self.lock();
        let id = ObserverId(state.next_id);
        state.next_id += 1;
        state.observers.push((id, observer));
        debug!(observer = id.0, "Status observer attached");
        id
    }

    /// Removes an observer. Returns `false` if it was not registered.
    pub fn detach(&self, id: ObserverId) -> bool {
        let mut state = self.lock();
        let before = state.observers.len();
        state.observers.retain(|(existing, _)| *existing != id);
        let removed = state.observers.len() != before;
        if removed {
            debug!(observer = id.0, "Status observer detached");
        }
        removed
    }

    /// Whether at least one attached observer is still active.
    pub fn has_active_observers(&self) -> bool {
        self.lock()
            .observers
            .iter()
            .any(|(_, observer)| observer.is_active())
    }

    /// Offers a new snapshot for broadcasting.
    pub fn notify(&self, snapshot: ServiceStatus) {
        let mut state = self.lock();
        state.observers.retain(|(_, observer)| observer.is_active());

        if state.observers.is_empty() {
            state.cancel_pending();
            state.latest = None;
            return;
        }

        state.latest = Some(snapshot);
        let now = Instant::now();
        let since_last = state.last_sent.map(|at| now.saturating_duration_since(at));

        match since_last {
            Some(elapsed) if elapsed < self.interval => {
                if state.pending.is_some() {
                    return;
                }
                let Ok(runtime) = Handle::try_current() else {
                    // No runtime to defer on: deliver immediately.
                    let (targets, snapshot) = Self::take_send(&mut state, now);
                    drop(state);
                    deliver(&targets, snapshot);
                    return;
                };
                let delay = self.interval - elapsed;
                let shared = Arc::clone(&self.state);
                state.pending = Some(runtime.spawn(async move {
                    sleep(delay).await;
                    flush_deferred(&shared);
                }));
            }
            _ => {
                state.cancel_pending();
                let (targets, snapshot) = Self::take_send(&mut state, now);
                drop(state);
                deliver(&targets, snapshot);
            }
        }
    }

    fn take_send(
        state: &mut BroadcastState,
        now: Instant,
    ) -> (Vec<Arc<dyn StatusObserver>>, Option<ServiceStatus>) {
        state.last_sent = Some(now);
        (state.active_observers(), state.latest.take())
    }
}

fn flush_deferred(shared: &Mutex<BroadcastState>) {
    let mut state = shared
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    state.pending = None;
    let targets = state.active_observers();
    if targets.is_empty() {
        state.latest = None;
        return;
    }
    let snapshot = state.latest.take();
    state.last_sent = Some(Instant::now());
    drop(state);
    deliver(&targets, snapshot);
}

fn deliver(targets: &[Arc<dyn StatusObserver>], snapshot: Option<ServiceStatus>) {
    let Some(snapshot) = snapshot else {
        return;
    };
    for observer in targets {
        observer.on_status(&snapshot);
    }
}
