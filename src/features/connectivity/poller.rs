//! Periodic reachability probing feeding a [`ConnectivityMonitor`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::ConnectivityMonitor;
use crate::error::StudySyncError;

/// A single reachability check.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns `true` if the backend looks reachable.
    async fn probe(&self) -> bool;
}

/// Probes by opening a TCP connection to the API host.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe `host:port` directly.
    #[must_use]
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    /// Probe the host and port of an API base URL.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the URL has no host or no known port.
    pub fn from_base_url(base_url: &str, timeout: Duration) -> Result<Self, StudySyncError> {
        let url = reqwest::Url::parse(base_url)
            .map_err(|e| StudySyncError::Config(format!("Invalid API base URL {base_url}: {e}")))?;

        let host = url
            .host_str()
            .ok_or_else(|| StudySyncError::Config(format!("API base URL has no host: {base_url}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| StudySyncError::Config(format!("API base URL has no port: {base_url}")))?;

        Ok(Self::new(format!("{host}:{port}"), timeout))
    }

    /// The probed `host:port`.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn probe(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                trace!(address = %self.address, error = %e, "probe failed");
                false
            },
            Err(_) => {
                trace!(address = %self.address, "probe timed out");
                false
            },
        }
    }
}

/// Requires several identical readings before a state change is accepted.
#[derive(Debug)]
struct Debouncer {
    required: u32,
    candidate: Option<bool>,
    streak: u32,
}

impl Debouncer {
    fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            candidate: None,
            streak: 0,
        }
    }

    /// Feed a reading; returns the new state once it is stable.
    fn observe(&mut self, current: bool, reading: bool) -> Option<bool> {
        if reading == current {
            self.candidate = None;
            self.streak = 0;
            return None;
        }

        if self.candidate == Some(reading) {
            self.streak += 1;
        } else {
            self.candidate = Some(reading);
            self.streak = 1;
        }

        if self.streak >= self.required {
            self.candidate = None;
            self.streak = 0;
            Some(reading)
        } else {
            None
        }
    }
}

/// Polls a probe on an interval and reports debounced readings.
pub struct ConnectivityPoller {
    probe: Arc<dyn ConnectivityProbe>,
    monitor: ConnectivityMonitor,
    interval: Duration,
    debounce_samples: u32,
}

impl ConnectivityPoller {
    /// Create a poller.
    #[must_use]
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        monitor: ConnectivityMonitor,
        interval: Duration,
        debounce_samples: u32,
    ) -> Self {
        Self {
            probe,
            monitor,
            interval,
            debounce_samples,
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut debouncer = Debouncer::new(self.debounce_samples);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("connectivity poller stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let reading = self.probe.probe().await;
                    if let Some(online) = debouncer.observe(self.monitor.is_online(), reading) {
                        self.monitor.report(online);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::features::connectivity::ConnectivityEvent;

    struct ScriptedProbe {
        readings: Mutex<VecDeque<bool>>,
        fallback: bool,
    }

    #[async_trait]
    impl ConnectivityProbe for ScriptedProbe {
        async fn probe(&self) -> bool {
            self.readings
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback)
        }
    }

    #[test]
    fn test_debouncer_requires_streak() {
        let mut debouncer = Debouncer::new(2);
        assert_eq!(debouncer.observe(true, false), None);
        assert_eq!(debouncer.observe(true, true), None);
        assert_eq!(debouncer.observe(true, false), None);
        assert_eq!(debouncer.observe(true, false), Some(false));
        assert_eq!(debouncer.observe(false, false), None);
    }

    #[test]
    fn test_debouncer_single_sample() {
        let mut debouncer = Debouncer::new(0);
        assert_eq!(debouncer.observe(false, true), Some(true));
    }

    #[test]
    fn test_tcp_probe_from_base_url() {
        let probe = TcpProbe::from_base_url("https://api.example.edu/v1", Duration::from_secs(1))
            .unwrap();
        assert_eq!(probe.address(), "api.example.edu:443");

        let probe =
            TcpProbe::from_base_url("http://localhost:8080/api", Duration::from_secs(1)).unwrap();
        assert_eq!(probe.address(), "localhost:8080");

        assert!(TcpProbe::from_base_url("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_tcp_probe_closed_port() {
        let probe = TcpProbe::new("127.0.0.1:9", Duration::from_millis(500));
        assert!(!probe.probe().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_reports_debounced_transitions() {
        let monitor = ConnectivityMonitor::new(true);
        let mut events = monitor.subscribe();
        let probe = Arc::new(ScriptedProbe {
            readings: Mutex::new(VecDeque::from([false, true, false, false, true, true])),
            fallback: true,
        });

        let cancel = CancellationToken::new();
        let poller = ConnectivityPoller::new(probe, monitor.clone(), Duration::from_secs(1), 2);
        let handle = tokio::spawn(poller.run(cancel.clone()));

        assert_eq!(events.recv().await.unwrap(), ConnectivityEvent::Offline);
        assert_eq!(events.recv().await.unwrap(), ConnectivityEvent::Online);

        cancel.cancel();
        handle.await.unwrap();
        assert!(monitor.is_online());
    }
}
