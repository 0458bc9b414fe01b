//! Command-line interface for studysync.

pub mod args;
pub mod commands;
