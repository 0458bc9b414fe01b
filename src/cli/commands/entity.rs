//! Entity mutation commands.

use serde_json::Value;

use super::Context;
use crate::cli::args::{EntityCommands, OutputFormat};
use crate::error::StudySyncError;
use crate::features::sync::{EntityKind, MutationDispatcher, OperationType};
use crate::output::format_submission;

/// Execute a create/update/delete for one entity kind.
///
/// # Errors
///
/// Returns an error if the payload is not a JSON object, the backend rejects
/// the change, or queueing it fails.
pub async fn entity(
    ctx: &Context,
    kind: EntityKind,
    cmd: EntityCommands,
    format: OutputFormat,
) -> Result<String, StudySyncError> {
    let (op_type, endpoint, payload) = match cmd {
        EntityCommands::Create { payload } => (
            OperationType::Create,
            kind.collection().to_string(),
            Some(parse_payload(&payload)?),
        ),
        EntityCommands::Update { id, payload } => (
            OperationType::Update,
            kind.instance(&id),
            Some(parse_payload(&payload)?),
        ),
        EntityCommands::Delete { id } => (OperationType::Delete, kind.instance(&id), None),
    };

    let manager = ctx.manager(kind.partition(), None).await?;
    let dispatcher = MutationDispatcher::new(manager);
    let submission = dispatcher.submit(op_type, &endpoint, payload).await?;

    format_submission(&submission, format)
}

fn parse_payload(raw: &str) -> Result<Value, StudySyncError> {
    let value: Value = serde_json::from_str(raw)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(StudySyncError::InvalidInput(
            "payload must be a JSON object".to_string(),
        ))
    }
}
