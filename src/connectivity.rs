//! Connectivity monitoring
//!
//! Tracks whether the device can reach the network, fed by whatever
//! reachability observer the host platform provides. The monitor is an
//! explicitly constructed instance owned by the application's composition
//! root and injected where needed — never a process-wide global — so tests
//! can drive it with synthetic samples.
//!
//! Missing observer data fails open: an unknown connection state is treated
//! as connected, an unknown reachability as reachable. Blocking work on a
//! check that itself failed would lock users out for no reason.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// One notification from the platform's reachability observer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectivitySample {
    /// Link-layer connectivity, if the platform knows it
    pub is_connected: Option<bool>,
    /// Whether the internet is actually reachable over the link, if known
    pub internet_reachable: Option<bool>,
    /// Connection type reported by the platform (e.g. "wifi", "cellular")
    pub kind: String,
}

/// Current connectivity, derived from the latest sample
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    /// Link-layer connectivity
    pub is_connected: bool,
    /// Connected and the internet is not known to be unreachable
    pub is_online: bool,
}

impl Default for ConnectivityState {
    // Assume online until the first sample says otherwise
    fn default() -> Self {
        Self {
            is_connected: true,
            is_online: true,
        }
    }
}

/// Observes reachability samples and exposes derived connectivity state
pub struct ConnectivityMonitor {
    state_tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    /// Create a monitor in the assumed-online initial state
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::default());
        Self { state_tx }
    }

    /// The current connectivity state
    pub fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    /// Whether the device is currently considered online
    pub fn is_online(&self) -> bool {
        self.state().is_online
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    /// Apply a platform sample and recompute the state
    ///
    /// Returns `true` exactly when this sample moved the monitor from
    /// not-online to online — the one transition that triggers a queue drain.
    /// Every other transition returns `false`.
    pub fn update(&self, sample: &ConnectivitySample) -> bool {
        let was_online = self.state().is_online;

        let is_connected = sample.is_connected.unwrap_or(true);
        let is_online = is_connected && sample.internet_reachable.unwrap_or(true);
        let next = ConnectivityState {
            is_connected,
            is_online,
        };

        if next != self.state() {
            tracing::info!(
                is_connected,
                is_online,
                kind = %sample.kind,
                "connectivity changed"
            );
        }
        self.state_tx.send_replace(next);

        is_online && !was_online
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}
