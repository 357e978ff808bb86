//! Connectivity monitor
//!
//! Cached reachability flag for the drain loop. The probe runs at
//! most once per refresh interval; state transitions are logged once
//! per transition, not per check.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Well-known probe target; any response at all means the network
/// path out of the site is up.
const PROBE_URL: &str = "http://connectivitycheck.gstatic.com/generate_204";

const PROBE_TIMEOUT_SECS: u64 = 5;

struct ProbeState {
    online: bool,
    checked_at: Option<Instant>,
}

pub struct ConnectivityMonitor {
    http: reqwest::Client,
    probe_url: String,
    state: Mutex<ProbeState>,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        Self::with_probe_url(PROBE_URL)
    }

    /// Probe a specific URL (tests point this at a local listener).
    pub fn with_probe_url(url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            probe_url: url.into(),
            state: Mutex::new(ProbeState {
                // Optimistic start: first drain pass probes for real
                online: true,
                checked_at: None,
            }),
        }
    }

    /// Current flag, refreshing via the probe when the cached value is
    /// older than `refresh_interval`.
    pub async fn is_online(&self, refresh_interval: Duration) -> bool {
        let mut state = self.state.lock().await;

        if let Some(checked_at) = state.checked_at {
            if checked_at.elapsed() < refresh_interval {
                return state.online;
            }
        }

        let online = self.probe().await;
        if online != state.online {
            if online {
                tracing::info!("Connectivity restored");
            } else {
                tracing::warn!("Connectivity lost, uploads will queue");
            }
        }
        state.online = online;
        state.checked_at = Some(Instant::now());
        online
    }

    /// Last cached flag without probing (status API).
    pub async fn last_known(&self) -> bool {
        self.state.lock().await.online
    }

    async fn probe(&self) -> bool {
        match self.http.get(&self.probe_url).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}
