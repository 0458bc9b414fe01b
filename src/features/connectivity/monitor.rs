//! Current online/offline state with transition events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

/// Capacity of the transition event channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// A connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

impl ConnectivityEvent {
    const fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

impl std::fmt::Display for ConnectivityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Tracks whether the backend is reachable.
///
/// Clones share state. Reports that do not change the state are dropped, so
/// subscribers see each transition exactly once.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    offline: Arc<AtomicBool>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the platform's current signal.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            offline: Arc::new(AtomicBool::new(!online)),
            events,
        }
    }

    /// Whether the backend is currently considered unreachable.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Whether the backend is currently considered reachable.
    #[must_use]
    pub fn is_online(&self) -> bool {
        !self.is_offline()
    }

    /// Record a connectivity reading.
    ///
    /// Returns `true` when the reading changed the state and an event was
    /// emitted.
    pub fn report(&self, online: bool) -> bool {
        let was_offline = self.offline.swap(!online, Ordering::SeqCst);
        if was_offline != online {
            return false;
        }

        let event = ConnectivityEvent::from_online(online);
        info!(%event, "connectivity changed");
        // No receivers is fine.
        let _ = self.events.send(event);
        true
    }

    /// Subscribe to transitions. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_initial_state() {
        assert!(ConnectivityMonitor::new(true).is_online());
        assert!(ConnectivityMonitor::new(false).is_offline());
    }

    #[test]
    fn test_transitions_emitted_once() {
        let monitor = ConnectivityMonitor::new(true);
        let mut rx = monitor.subscribe();

        assert!(!monitor.report(true));
        assert!(monitor.report(false));
        assert!(!monitor.report(false));
        assert!(monitor.report(true));

        assert_eq!(rx.try_recv().unwrap(), ConnectivityEvent::Offline);
        assert_eq!(rx.try_recv().unwrap(), ConnectivityEvent::Online);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_clones_share_state() {
        let monitor = ConnectivityMonitor::new(true);
        let handle = monitor.clone();
        let mut rx = monitor.subscribe();

        handle.report(false);
        assert!(monitor.is_offline());
        assert_eq!(rx.try_recv().unwrap(), ConnectivityEvent::Offline);
    }

    #[test]
    fn test_report_without_subscribers() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(monitor.report(true));
        assert!(monitor.is_online());
    }
}
