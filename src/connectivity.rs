//! Connectivity monitor: tracks whether the backend is believed reachable and
//! notifies subscribers when that belief flips.
//!
//! The monitor is purely event driven. Whatever observes the platform's
//! reachability signal calls [`ConnectivityMonitor::report`]; there is no
//! polling or heartbeat, so `current_state` can lag reality.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn is_online(self) -> bool {
        self == ConnectivityState::Online
    }

    pub fn from_online(online: bool) -> Self {
        if online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ToOnline,
    ToOffline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(SubscriptionId, Direction, Callback)>,
}

pub struct ConnectivityMonitor {
    state: watch::Sender<ConnectivityState>,
    subscribers: Mutex<Subscribers>,
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

impl ConnectivityMonitor {
    /// Start from the platform's answer to "am I online right now".
    pub fn new(initial: ConnectivityState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    pub fn current_state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current_state().is_online()
    }

    /// Register `callback` for every transition in `direction`. Callbacks of
    /// one direction run in registration order.
    pub fn on_transition<F>(&self, direction: Direction, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = SubscriptionId(subs.next_id);
        subs.next_id += 1;
        subs.entries.push((id, direction, Arc::new(callback)));
        id
    }

    /// Returns whether a subscription was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subs.entries.len();
        subs.entries.retain(|(sid, _, _)| *sid != id);
        subs.entries.len() != before
    }

    /// Async view of the state for observers that prefer awaiting changes.
    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// Feed a reachability event. Returns the transition it caused, if any;
    /// repeating the current state is not a transition and notifies nobody.
    pub fn report(&self, observed: ConnectivityState) -> Option<Direction> {
        let changed = self.state.send_if_modified(|current| {
            if *current == observed {
                false
            } else {
                *current = observed;
                true
            }
        });
        if !changed {
            debug!(state = %observed, "reachability event without transition");
            return None;
        }

        let direction = match observed {
            ConnectivityState::Online => Direction::ToOnline,
            ConnectivityState::Offline => Direction::ToOffline,
        };
        info!(state = %observed, "connectivity changed");

        // Snapshot under the lock, invoke outside it so callbacks may subscribe.
        let callbacks: Vec<Callback> = {
            let subs = self
                .subscribers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subs.entries
                .iter()
                .filter(|(_, d, _)| *d == direction)
                .map(|(_, _, cb)| cb.clone())
                .collect()
        };
        for cb in callbacks {
            cb();
        }
        Some(direction)
    }
}
