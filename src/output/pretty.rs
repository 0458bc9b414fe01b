use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::features::sync::{
    DeadLetter, OperationOutcome, OperationType, PendingOperation, Submission, SyncOutcome,
    SyncSession,
};

/// Human-friendly age of a timestamp.
pub fn format_age(at: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(at);
    if age.num_days() > 0 {
        format!("{} days ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{} hours ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{} minutes ago", age.num_minutes())
    } else {
        "just now".to_string()
    }
}

fn op_label(op_type: OperationType) -> colored::ColoredString {
    let label = format!("{:<6}", op_type.display_name().to_uppercase());
    match op_type {
        OperationType::Create => label.green(),
        OperationType::Update => label.yellow(),
        OperationType::Delete => label.red(),
    }
}

fn operation_line(op: &PendingOperation) -> String {
    let mut line = format!(
        "{} {}  {}  {}",
        op_label(op.op_type),
        op.endpoint.bold(),
        op.id.dimmed(),
        format_age(op.timestamp).dimmed()
    );

    if op.attempts > 0 {
        line.push_str(&format!("  {}", format!("{} failed attempts", op.attempts).red()));
    }

    line
}

/// Format queued operations as a pretty list
pub fn format_operations_pretty(operations: &[PendingOperation], title: &str) -> String {
    if operations.is_empty() {
        return format!("{title} (0 items)\n  Nothing queued");
    }

    let mut output = format!("{} ({} items)\n", title, operations.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for op in operations {
        output.push_str(&operation_line(op));
        output.push('\n');
        if let Some(error) = &op.last_error {
            output.push_str(&format!("       {}\n", error.dimmed()));
        }
    }

    output
}

/// Format a submission result
pub fn format_submission_pretty(submission: &Submission) -> String {
    let op = submission.operation();
    match submission {
        Submission::Sent(_) => format!(
            "{} {} {}",
            "✓".green(),
            op.op_type.display_name(),
            op.endpoint.bold()
        ),
        Submission::Queued(_) => format!(
            "{} {} {} {}\n  {}",
            "⏸".yellow(),
            op.op_type.display_name(),
            op.endpoint.bold(),
            "queued (offline)".yellow(),
            format!("id: {}", op.id).dimmed()
        ),
    }
}

fn session_pretty(session: &SyncSession) -> String {
    let mut output = format!(
        "{}  {} synced, {} failed, {} skipped\n",
        session.partition.to_string().bold(),
        session.synced_count().to_string().green(),
        session.failed_count().to_string().red(),
        session.skipped_count()
    );

    for report in &session.operations {
        let (icon, detail) = match &report.outcome {
            OperationOutcome::Synced => ("✓".green(), String::new()),
            OperationOutcome::Failed { class, error } => {
                ("✗".red(), format!("  {class}: {error}"))
            },
            OperationOutcome::Skipped => ("-".dimmed(), "  waiting on earlier change".to_string()),
            OperationOutcome::DeadLettered { error } => {
                ("☠".red(), format!("  moved to dead letters: {error}"))
            },
        };
        output.push_str(&format!(
            "  {} {} {}{}\n",
            icon,
            op_label(report.op_type),
            report.endpoint,
            detail.dimmed()
        ));
    }

    if session.aborted_on_connectivity {
        output.push_str(&format!(
            "  {}\n",
            "Backend unreachable; remaining changes stay queued".yellow()
        ));
    }

    output
}

/// Format the results of sync passes
pub fn format_outcomes_pretty(outcomes: &[SyncOutcome]) -> String {
    let mut output = "Sync Results".bold().to_string();
    output.push('\n');
    output.push_str(&"─".repeat(40));
    output.push('\n');

    for outcome in outcomes {
        match outcome {
            SyncOutcome::Completed { session } => output.push_str(&session_pretty(session)),
            SyncOutcome::Skipped { reason } => {
                output.push_str(&format!("  {} {}\n", "skipped:".dimmed(), reason));
            },
        }
    }

    output
}

/// Format dead letters as a pretty list
pub fn format_dead_letters_pretty(letters: &[DeadLetter]) -> String {
    if letters.is_empty() {
        return "Dead letters (0 items)\n  None".to_string();
    }

    let mut output = format!("Dead letters ({} items)\n", letters.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for letter in letters {
        output.push_str(&operation_line(&letter.operation));
        output.push('\n');
        output.push_str(&format!(
            "       {} {}\n",
            format!("failed {}:", format_age(letter.failed_at)).dimmed(),
            letter.operation.last_error.as_deref().unwrap_or("unknown error")
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;
    use crate::features::sync::Partition;
    use serde_json::json;

    fn make_op(op_type: OperationType, endpoint: &str) -> PendingOperation {
        let payload = op_type.carries_body().then(|| json!({"name": "Essay"}));
        PendingOperation::new(op_type, endpoint, payload, "alice").unwrap()
    }

    #[test]
    fn test_format_operations_pretty_empty() {
        let output = format_operations_pretty(&[], "Queued changes");
        assert!(output.contains("Queued changes (0 items)"));
        assert!(output.contains("Nothing queued"));
    }

    #[test]
    fn test_format_operations_pretty_with_failure() {
        let mut op = make_op(OperationType::Update, "/tasks/4");
        op.attempts = 2;
        op.last_error = Some("HTTP 422: invalid due date".to_string());

        let output = format_operations_pretty(&[op.clone()], "Queued changes");
        assert!(output.contains("Queued changes (1 items)"));
        assert!(output.contains("UPDATE"));
        assert!(output.contains("/tasks/4"));
        assert!(output.contains(&op.id));
        assert!(output.contains("2 failed attempts"));
        assert!(output.contains("invalid due date"));
    }

    #[test]
    fn test_format_submission_pretty() {
        let queued = Submission::Queued(make_op(OperationType::Delete, "/courses/cs101"));
        let output = format_submission_pretty(&queued);
        assert!(output.contains("queued (offline)"));
        assert!(output.contains("/courses/cs101"));

        let sent = Submission::Sent(make_op(OperationType::Create, "/tasks"));
        assert!(!format_submission_pretty(&sent).contains("queued"));
    }

    #[test]
    fn test_format_outcomes_pretty() {
        let op = make_op(OperationType::Delete, "/tasks/1");
        let mut session = SyncSession::new(Partition::Tasks);
        session.record(&op, OperationOutcome::Synced);
        session.record(
            &op,
            OperationOutcome::Failed {
                class: FailureClass::Rejected,
                error: "HTTP 404".to_string(),
            },
        );
        session.aborted_on_connectivity = true;

        let output = format_outcomes_pretty(&[
            SyncOutcome::Completed { session },
            SyncOutcome::Skipped {
                reason: crate::features::sync::SkipReason::Empty,
            },
        ]);
        assert!(output.contains("Sync Results"));
        assert!(output.contains("rejected: HTTP 404"));
        assert!(output.contains("Backend unreachable"));
        assert!(output.contains("nothing queued"));
    }

    #[test]
    fn test_format_dead_letters_pretty() {
        let mut op = make_op(OperationType::Delete, "/routines/9");
        op.last_error = Some("HTTP 410".to_string());
        let output = format_dead_letters_pretty(&[DeadLetter {
            operation: op,
            failed_at: Utc::now(),
        }]);
        assert!(output.contains("Dead letters (1 items)"));
        assert!(output.contains("HTTP 410"));
        assert!(format_dead_letters_pretty(&[]).contains("None"));
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(Utc::now()), "just now");
        assert_eq!(format_age(Utc::now() - chrono::Duration::hours(3)), "3 hours ago");
    }
}
