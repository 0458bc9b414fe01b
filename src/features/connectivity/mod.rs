//! Connectivity tracking.
//!
//! [`ConnectivityMonitor`] holds the current state and broadcasts
//! transitions. [`ConnectivityPoller`] is the platform side: it probes the
//! backend and feeds debounced readings into the monitor.

mod monitor;
mod poller;

pub use monitor::{ConnectivityEvent, ConnectivityMonitor};
pub use poller::{ConnectivityPoller, ConnectivityProbe, TcpProbe};
