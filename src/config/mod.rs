//! Configuration management for studysync.
//!
//! This module handles loading configuration from `~/.studysync/`.

mod paths;
mod settings;

pub use paths::{Paths, HOME_ENV};
pub use settings::{
    ApiConfig, ColorSetting, Config, ConnectivityConfig, GeneralConfig, RejectionMode, SyncConfig,
};
