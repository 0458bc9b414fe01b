//! Output formatting for studysync.
//!
//! Every formatter has a pretty (colored) and a JSON rendering.

mod json;
mod pretty;

use crate::cli::args::OutputFormat;
use crate::error::StudySyncError;
use crate::features::sync::{DeadLetter, PendingOperation, Submission, SyncOutcome};

pub use json::*;
pub use pretty::*;

/// Format queued operations based on output format
///
/// # Errors
///
/// Returns `StudySyncError::Parse` if JSON serialization fails.
pub fn format_operations(
    operations: &[PendingOperation],
    title: &str,
    format: OutputFormat,
) -> Result<String, StudySyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_operations_pretty(operations, title)),
        OutputFormat::Json => format_operations_json(operations),
    }
}

/// Format a submitted mutation based on output format
///
/// # Errors
///
/// Returns `StudySyncError::Parse` if JSON serialization fails.
pub fn format_submission(
    submission: &Submission,
    format: OutputFormat,
) -> Result<String, StudySyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_submission_pretty(submission)),
        OutputFormat::Json => to_json(submission),
    }
}

/// Format sync pass results based on output format
///
/// # Errors
///
/// Returns `StudySyncError::Parse` if JSON serialization fails.
pub fn format_outcomes(
    outcomes: &[SyncOutcome],
    format: OutputFormat,
) -> Result<String, StudySyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_outcomes_pretty(outcomes)),
        OutputFormat::Json => format_outcomes_json(outcomes),
    }
}

/// Format dead letters based on output format
///
/// # Errors
///
/// Returns `StudySyncError::Parse` if JSON serialization fails.
pub fn format_dead_letters(
    letters: &[DeadLetter],
    format: OutputFormat,
) -> Result<String, StudySyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_dead_letters_pretty(letters)),
        OutputFormat::Json => format_dead_letters_json(letters),
    }
}
