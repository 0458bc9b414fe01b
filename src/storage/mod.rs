//! Storage layer for studysync.
//!
//! SQLite-backed persistence for the offline operation queue.

mod database;
mod migrations;

pub use database::Database;
