//! User-facing sync status.

use serde::Serialize;
use tokio::sync::watch;

/// Aggregate sync state shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Offline { queued: usize },
    AwaitingConfirmation { queued: usize },
    Syncing,
    Synced,
    Failed { failed: usize },
    Error { message: String },
}

impl SyncStatus {
    /// Indicator text, or `None` when nothing needs showing.
    #[must_use]
    pub fn indicator(&self) -> Option<String> {
        match self {
            Self::Idle => None,
            Self::Offline { queued } => Some(format!(
                "offline — {queued} {} queued",
                plural(*queued, "change", "changes")
            )),
            Self::AwaitingConfirmation { queued } => Some(format!(
                "back online — {queued} {} ready to sync",
                plural(*queued, "change", "changes")
            )),
            Self::Syncing => Some("syncing…".to_string()),
            Self::Synced => Some("synced".to_string()),
            Self::Failed { failed } => Some(format!("{failed} failed")),
            Self::Error { message } => Some(format!("sync error: {message}")),
        }
    }
}

const fn plural<'a>(n: usize, one: &'a str, many: &'a str) -> &'a str {
    if n == 1 {
        one
    } else {
        many
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.indicator() {
            Some(text) => write!(f, "{text}"),
            None => write!(f, "idle"),
        }
    }
}

/// Persistent, dismissible view over a status channel.
#[derive(Debug)]
pub struct StatusIndicator {
    rx: watch::Receiver<SyncStatus>,
    dismissed: bool,
}

impl StatusIndicator {
    #[must_use]
    pub const fn new(rx: watch::Receiver<SyncStatus>) -> Self {
        Self {
            rx,
            dismissed: false,
        }
    }

    /// Text to show right now.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        if self.dismissed {
            return None;
        }
        self.rx.borrow().indicator()
    }

    /// Hide the indicator until the status changes.
    pub fn dismiss(&mut self) {
        self.dismissed = true;
    }

    /// Wait for the next status change and return its text.
    ///
    /// Returns `None` once the publisher is gone.
    pub async fn changed(&mut self) -> Option<Option<String>> {
        self.rx.changed().await.ok()?;
        self.dismissed = false;
        Some(self.text())
    }
}
