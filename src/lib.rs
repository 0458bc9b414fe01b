//! studysync - offline-first changes for the study dashboard
//!
//! Tasks, routines, courses and teachers can be created, updated and deleted
//! while the backend is unreachable. Changes are persisted in a local SQLite
//! queue and replayed in order, with idempotency keys, once connectivity
//! returns.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod features;
pub mod output;
pub mod remote;
pub mod storage;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use error::StudySyncError;
pub use features::sync::{OperationQueueManager, ReconnectSyncCoordinator};
