//! Sync command implementation.
//!
//! Handles queue inspection, manual replay and the long-running watcher.

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{partitions, Context};
use crate::cli::args::{DeadLetterCommands, OutputFormat, SyncCommands};
use crate::error::StudySyncError;
use crate::features::background::{BackgroundSync, BackgroundSyncRegistrar, CompletionNotifier};
use crate::features::connectivity::{ConnectivityPoller, TcpProbe};
use crate::features::sync::{
    EntityKind, Partition, QueueStore, ReconnectMode, ReconnectSyncCoordinator, StatusIndicator,
    SyncStatus,
};
use crate::output::{
    format_age, format_dead_letters, format_operations, format_outcomes, to_json,
};

/// How often the background worker retries partitions it could not finish.
const BACKGROUND_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Execute sync subcommands.
///
/// # Errors
///
/// Returns an error if the queue cannot be read or written, or if output
/// formatting fails.
pub async fn sync(
    ctx: &Context,
    cmd: SyncCommands,
    format: OutputFormat,
    force_offline: bool,
) -> Result<String, StudySyncError> {
    match cmd {
        SyncCommands::Status { partition } => show_status(ctx, partition.as_deref(), format).await,
        SyncCommands::List { partition, limit } => {
            list_operations(ctx, partition.as_deref(), limit, format).await
        },
        SyncCommands::Run { partition } => run_sync(ctx, partition.as_deref(), format).await,
        SyncCommands::Clear { partition, force } => {
            clear_operations(ctx, partition.as_deref(), force, format).await
        },
        SyncCommands::Prune { older_than } => prune_synced(ctx, older_than, format),
        SyncCommands::DeadLetters(args) => dead_letters(ctx, args.command, format).await,
        SyncCommands::Watch { prompt } => watch(ctx, prompt, force_offline, format).await,
    }
}

/// Show queue status.
async fn show_status(
    ctx: &Context,
    partition: Option<&str>,
    format: OutputFormat,
) -> Result<String, StudySyncError> {
    let mut rows = Vec::new();
    for partition in partitions(partition)? {
        let stats = ctx.store().stats(partition).await?;
        let queued_for_user = match ctx.user() {
            Ok(_) => Some(ctx.manager(partition, None).await?.pending_count()),
            Err(_) => None,
        };
        rows.push((partition, stats, queued_for_user));
    }

    match format {
        OutputFormat::Json => {
            let data: Vec<_> = rows
                .iter()
                .map(|(partition, stats, queued)| {
                    serde_json::json!({
                        "partition": partition,
                        "pending": stats.pending,
                        "queued_for_user": queued,
                        "dead_letters": stats.dead_letters,
                        "synced": stats.synced,
                        "oldest_pending": stats.oldest_pending.map(|t| t.to_rfc3339()),
                    })
                })
                .collect();
            to_json(&serde_json::json!({ "partitions": data }))
        },
        OutputFormat::Pretty => {
            let mut lines = Vec::new();

            lines.push("Sync Queue Status".bold().to_string());
            lines.push("─".repeat(40));

            let mut total_pending = 0;
            for (partition, stats, queued) in &rows {
                total_pending += stats.pending;
                lines.push(format!("  {}", partition.to_string().bold()));
                lines.push(format!(
                    "    Pending:       {} {}",
                    stats.pending,
                    if stats.pending > 0 {
                        "changes waiting".dimmed()
                    } else {
                        "".dimmed()
                    }
                ));
                if let Some(queued) = queued {
                    lines.push(format!("    Yours:         {queued}"));
                }
                lines.push(format!(
                    "    Dead letters:  {} {}",
                    stats.dead_letters,
                    if stats.dead_letters > 0 {
                        "need attention".red()
                    } else {
                        "".normal()
                    }
                ));
                lines.push(format!("    Synced ids:    {}", stats.synced));
                if let Some(oldest) = stats.oldest_pending {
                    lines.push(format!("    Oldest:        {}", format_age(oldest).dimmed()));
                }
            }

            if total_pending > 0 {
                lines.push(String::new());
                lines.push(
                    "Run 'studysync sync run' to replay queued changes"
                        .dimmed()
                        .to_string(),
                );
            }

            Ok(lines.join("\n"))
        },
    }
}

/// List queued operations for the active user.
async fn list_operations(
    ctx: &Context,
    partition: Option<&str>,
    limit: usize,
    format: OutputFormat,
) -> Result<String, StudySyncError> {
    let managers = ctx.managers(&partitions(partition)?, None).await?;

    let mut operations: Vec<_> = managers
        .iter()
        .flat_map(|m| m.pending_operations())
        .collect();
    operations.sort_by_key(|op| op.timestamp);
    operations.truncate(limit);

    format_operations(&operations, "Queued changes", format)
}

/// Replay queued operations now.
async fn run_sync(
    ctx: &Context,
    partition: Option<&str>,
    format: OutputFormat,
) -> Result<String, StudySyncError> {
    let managers = ctx.managers(&partitions(partition)?, None).await?;

    let mut outcomes = Vec::with_capacity(managers.len());
    for manager in &managers {
        outcomes.push(manager.sync_operations().await?);
    }

    format_outcomes(&outcomes, format)
}

/// Discard queued operations.
async fn clear_operations(
    ctx: &Context,
    partition: Option<&str>,
    force: bool,
    format: OutputFormat,
) -> Result<String, StudySyncError> {
    if !force {
        return Err(StudySyncError::InvalidInput(
            "Queued changes will be lost. Re-run with --force to discard them".to_string(),
        ));
    }

    let managers = ctx.managers(&partitions(partition)?, None).await?;
    let mut removed = 0;
    for manager in &managers {
        removed += manager.discard_all().await?;
    }

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "removed": removed })),
        OutputFormat::Pretty => Ok(format!("Discarded {removed} queued changes")),
    }
}

/// Trim the synced-id ledger.
fn prune_synced(
    ctx: &Context,
    older_than: i64,
    format: OutputFormat,
) -> Result<String, StudySyncError> {
    let removed = ctx.store().prune_synced(older_than)?;

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "removed": removed })),
        OutputFormat::Pretty => Ok(format!(
            "Removed {removed} synced ids older than {older_than} hours"
        )),
    }
}

/// Partition an operation id belongs to, from its entity prefix.
fn partition_of(id: &str) -> Result<Partition, StudySyncError> {
    id.split('-')
        .next()
        .and_then(|prefix| prefix.parse::<EntityKind>().ok())
        .map(|kind| kind.partition())
        .ok_or_else(|| StudySyncError::NotFound(format!("Dead letter {id}")))
}

/// Dead-letter subcommands.
async fn dead_letters(
    ctx: &Context,
    cmd: DeadLetterCommands,
    format: OutputFormat,
) -> Result<String, StudySyncError> {
    match cmd {
        DeadLetterCommands::List { partition } => {
            let managers = ctx.managers(&partitions(partition.as_deref())?, None).await?;
            let mut letters = Vec::new();
            for manager in &managers {
                letters.extend(manager.dead_letters().await?);
            }
            format_dead_letters(&letters, format)
        },
        DeadLetterCommands::Requeue { id } => {
            let manager = ctx.manager(partition_of(&id)?, None).await?;
            let operation = manager.requeue_dead_letter(&id).await?;
            match format {
                OutputFormat::Json => to_json(&operation),
                OutputFormat::Pretty => Ok(format!(
                    "{} Requeued {} {}",
                    "✓".green(),
                    operation.op_type.display_name(),
                    operation.endpoint.bold()
                )),
            }
        },
        DeadLetterCommands::Discard { id } => {
            let manager = ctx.manager(partition_of(&id)?, None).await?;
            manager.discard_dead_letter(&id).await?;
            match format {
                OutputFormat::Json => to_json(&serde_json::json!({ "discarded": id })),
                OutputFormat::Pretty => Ok(format!("{} Discarded {}", "✓".green(), id)),
            }
        },
    }
}

fn render_status(status: &SyncStatus, text: Option<String>, format: OutputFormat) -> Option<String> {
    match format {
        OutputFormat::Json => serde_json::to_string(status).ok(),
        OutputFormat::Pretty => text.map(|text| match status {
            SyncStatus::Offline { .. } | SyncStatus::AwaitingConfirmation { .. } => {
                text.yellow().to_string()
            },
            SyncStatus::Synced => text.green().to_string(),
            SyncStatus::Failed { .. } | SyncStatus::Error { .. } => text.red().to_string(),
            SyncStatus::Idle | SyncStatus::Syncing => text,
        }),
    }
}

/// Run the monitor, coordinator and background worker until Ctrl-C.
async fn watch(
    ctx: &Context,
    prompt: bool,
    force_offline: bool,
    format: OutputFormat,
) -> Result<String, StudySyncError> {
    let config = &ctx.config;
    let connectivity = ctx.connectivity().clone();
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let (background, worker) = BackgroundSync::new(BACKGROUND_RETRY_INTERVAL);
    let registrar: Option<Arc<dyn BackgroundSyncRegistrar>> = config
        .sync
        .background_sync
        .then(|| Arc::new(background.clone()) as Arc<dyn BackgroundSyncRegistrar>);
    let managers = ctx.managers(&Partition::ALL, registrar).await?;

    if config.sync.background_sync {
        tasks.spawn(worker.run(managers.clone(), connectivity.clone(), cancel.clone()));
    }

    if force_offline {
        debug!("not probing connectivity");
    } else {
        let probe = TcpProbe::from_base_url(&config.api.base_url, config.connectivity.probe_timeout())?;
        let poller = ConnectivityPoller::new(
            Arc::new(probe),
            connectivity.clone(),
            config.connectivity.probe_interval(),
            config.connectivity.debounce_samples,
        );
        tasks.spawn(poller.run(cancel.clone()));
    }

    let mode = if prompt {
        ReconnectMode::Prompt
    } else {
        config.sync.reconnect_mode
    };
    let notifier: Arc<dyn CompletionNotifier> = Arc::new(background);
    let coordinator = Arc::new(ReconnectSyncCoordinator::new(
        managers.clone(),
        connectivity.clone(),
        notifier,
        mode,
        config.sync.completion_wait(),
    ));
    let mut indicator = StatusIndicator::new(coordinator.status());
    tasks.spawn(Arc::clone(&coordinator).run(cancel.clone()));

    if connectivity.is_online() && managers.iter().any(|m| m.has_pending()) {
        let coordinator = Arc::clone(&coordinator);
        tasks.spawn(async move {
            coordinator.sync_now().await;
        });
    }

    if format == OutputFormat::Pretty {
        println!(
            "{}",
            "Watching for reconnects. Enter: sync now, d: dismiss, Ctrl-C: stop".dimmed()
        );
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                }
                break;
            }
            changed = indicator.changed() => {
                let Some(text) = changed else { break };
                let status = coordinator.current_status();
                if let Some(line) = render_status(&status, text, format) {
                    println!("{line}");
                }
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "d" => indicator.dismiss(),
                    "" | "y" | "s" => {
                        let coordinator = Arc::clone(&coordinator);
                        tasks.spawn(async move {
                            if coordinator.is_awaiting_confirmation() {
                                coordinator.confirm_sync().await;
                            } else {
                                coordinator.sync_now().await;
                            }
                        });
                    },
                    other => debug!(input = other, "ignoring input"),
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "watch task failed");
        }
    }

    let remaining: usize = managers.iter().map(|m| m.pending_count()).sum();
    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "stopped": true, "queued": remaining })),
        OutputFormat::Pretty => Ok(format!("Stopped watching. {remaining} changes still queued")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_of() {
        assert_eq!(partition_of("task-1761-abc123").unwrap(), Partition::Tasks);
        assert_eq!(partition_of("teacher-1761-abc123").unwrap(), Partition::Courses);
        assert!(partition_of("grade-1761-abc123").is_err());
    }

    #[test]
    fn test_render_status_json() {
        let line = render_status(
            &SyncStatus::Failed { failed: 2 },
            Some("2 failed".to_string()),
            OutputFormat::Json,
        )
        .unwrap();
        assert_eq!(line, r#"{"state":"failed","failed":2}"#);
    }

    #[test]
    fn test_render_status_dismissed() {
        assert!(render_status(&SyncStatus::Synced, None, OutputFormat::Pretty).is_none());
    }
}
