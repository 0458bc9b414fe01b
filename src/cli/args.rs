use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "studysync")]
#[command(about = "Offline-first task, routine and course changes for the study dashboard")]
#[command(long_about = "studysync - offline-first changes for the study dashboard

Create, update and delete tasks, routines, courses and teachers. When the
backend is unreachable, changes are queued on this device and replayed in
order once it comes back.

QUICK START:
  studysync task create --payload '{\"name\": \"Essay\"}'
  studysync sync status          Show queued changes
  studysync sync run             Replay queued changes now
  studysync sync watch           Stay running and sync on reconnect

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting

For more information on a specific command, run:
  studysync <command> --help")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Defaults to the `general.default_output` config value.
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    /// Active user id
    ///
    /// Queued changes are scoped to this user. Falls back to
    /// `general.user_id` in the config file.
    #[arg(short, long, global = true, env = "STUDYSYNC_USER")]
    pub user: Option<String>,

    /// Treat the backend as unreachable without probing it
    #[arg(long, global = true)]
    pub offline: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, update or delete tasks
    ///
    /// # Examples
    ///
    ///   studysync task create --payload '{"name": "Essay", "due": "2026-11-02"}'
    ///   studysync task update 42 --payload '{"done": true}'
    ///   studysync task delete 42
    Task(EntityArgs),

    /// Create, update or delete routines
    Routine(EntityArgs),

    /// Create, update or delete courses
    Course(EntityArgs),

    /// Create, update or delete teachers
    Teacher(EntityArgs),

    /// Offline queue and sync
    ///
    /// # Subcommands
    ///
    ///   status        Show queued changes per partition
    ///   list          Show queued changes
    ///   run           Replay queued changes now
    ///   clear         Discard queued changes
    ///   prune         Trim the synced-id ledger
    ///   dead-letters  Inspect changes the backend kept rejecting
    ///   watch         Sync automatically on reconnect
    ///
    /// # Examples
    ///
    ///   studysync sync status
    ///   studysync sync list --partition routines
    ///   studysync sync run
    ///   studysync sync dead-letters list
    ///   studysync sync watch --prompt
    Sync(SyncArgs),

    /// Generate shell completions
    ///
    /// # Examples
    ///
    ///   studysync completions bash > ~/.bash_completion.d/studysync
    ///   studysync completions zsh > ~/.zfunc/_studysync
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, powershell, elvish)
        shell: String,
    },
}

/// Arguments for entity commands.
#[derive(Args)]
pub struct EntityArgs {
    #[command(subcommand)]
    pub command: EntityCommands,
}

/// Mutations on one entity kind.
#[derive(Subcommand)]
pub enum EntityCommands {
    /// Create a record
    Create {
        /// Record fields as a JSON object
        #[arg(long, short = 'p')]
        payload: String,
    },

    /// Update a record
    Update {
        /// Record id
        id: String,

        /// Changed fields as a JSON object
        #[arg(long, short = 'p')]
        payload: String,
    },

    /// Delete a record
    Delete {
        /// Record id
        id: String,
    },
}

/// Arguments for sync commands.
#[derive(Args)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub command: SyncCommands,
}

/// Sync subcommands.
#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show queued, synced and dead-lettered counts
    Status {
        /// Only this partition (tasks, routines, courses)
        #[arg(long, short = 'P')]
        partition: Option<String>,
    },

    /// List queued changes, oldest first
    List {
        /// Only this partition (tasks, routines, courses)
        #[arg(long, short = 'P')]
        partition: Option<String>,

        /// Maximum changes to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Replay queued changes now
    Run {
        /// Only this partition (tasks, routines, courses)
        #[arg(long, short = 'P')]
        partition: Option<String>,
    },

    /// Discard queued changes for the active user
    Clear {
        /// Only this partition (tasks, routines, courses)
        #[arg(long, short = 'P')]
        partition: Option<String>,

        /// Required; queued changes are lost
        #[arg(long)]
        force: bool,
    },

    /// Remove synced-id ledger entries older than the given age
    Prune {
        /// Maximum age in hours
        #[arg(long, default_value = "168")]
        older_than: i64,
    },

    /// Changes the backend kept rejecting
    DeadLetters(DeadLetterArgs),

    /// Stay running and sync whenever the backend comes back
    Watch {
        /// Ask before syncing on reconnect
        #[arg(long)]
        prompt: bool,
    },
}

/// Arguments for dead-letter commands.
#[derive(Args)]
pub struct DeadLetterArgs {
    #[command(subcommand)]
    pub command: DeadLetterCommands,
}

/// Dead-letter subcommands.
#[derive(Subcommand)]
pub enum DeadLetterCommands {
    /// List dead letters
    List {
        /// Only this partition (tasks, routines, courses)
        #[arg(long, short = 'P')]
        partition: Option<String>,
    },

    /// Put a dead letter back on the queue
    Requeue {
        /// Operation id
        id: String,
    },

    /// Drop a dead letter for good
    Discard {
        /// Operation id
        id: String,
    },
}
