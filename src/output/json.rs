//! JSON output formatting for studysync.

use serde::Serialize;
use serde_json::json;

use crate::error::StudySyncError;
use crate::features::sync::{DeadLetter, PendingOperation, SyncOutcome};

/// Format queued operations as JSON
///
/// # Errors
///
/// Returns `StudySyncError::Parse` if JSON serialization fails.
pub fn format_operations_json(operations: &[PendingOperation]) -> Result<String, StudySyncError> {
    to_json(&json!({
        "count": operations.len(),
        "items": operations,
    }))
}

/// Format sync pass results as JSON
///
/// # Errors
///
/// Returns `StudySyncError::Parse` if JSON serialization fails.
pub fn format_outcomes_json(outcomes: &[SyncOutcome]) -> Result<String, StudySyncError> {
    let failed: usize = outcomes.iter().map(SyncOutcome::failed_count).sum();
    to_json(&json!({
        "failed": failed,
        "passes": outcomes,
    }))
}

/// Format dead letters as JSON
///
/// # Errors
///
/// Returns `StudySyncError::Parse` if JSON serialization fails.
pub fn format_dead_letters_json(letters: &[DeadLetter]) -> Result<String, StudySyncError> {
    to_json(&json!({
        "count": letters.len(),
        "items": letters,
    }))
}

/// Serialize any value as pretty JSON
///
/// # Errors
///
/// Returns `StudySyncError::Parse` if JSON serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, StudySyncError> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::sync::{OperationType, Partition, SkipReason, SyncSession};

    #[test]
    fn test_format_operations_json() {
        let op = PendingOperation::new(OperationType::Delete, "/tasks/1", None, "alice").unwrap();
        let output = format_operations_json(&[op]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["count"], 1);
        assert_eq!(value["items"][0]["type"], "delete");
        assert_eq!(value["items"][0]["userId"], "alice");
        assert!(value["items"][0].get("payload").is_none());
    }

    #[test]
    fn test_format_outcomes_json() {
        let outcomes = vec![
            SyncOutcome::Skipped {
                reason: SkipReason::Offline,
            },
            SyncOutcome::Completed {
                session: SyncSession::new(Partition::Routines),
            },
        ];
        let output = format_outcomes_json(&outcomes).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["failed"], 0);
        assert_eq!(value["passes"][0]["result"], "skipped");
        assert_eq!(value["passes"][0]["reason"], "offline");
        assert_eq!(value["passes"][1]["session"]["partition"], "routines");
    }
}
