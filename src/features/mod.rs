//! Feature implementations for studysync.
//!
//! - Connectivity tracking
//! - Background sync facility
//! - Offline operation queue and reconnect sync

pub mod background;
pub mod connectivity;
pub mod sync;
