//! User-facing activity log: timestamped lines, appended by whichever component
//! caught a backend failure or wants to announce an action.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl fmt::Display for ActivityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Cheap to clone; every clone appends to the same log.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: Arc<RwLock<Vec<ActivityEntry>>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, message: impl Into<String>) {
        let entry = ActivityEntry {
            at: Utc::now(),
            message: message.into(),
        };
        info!(activity = %entry.message, "activity");
        self.entries.write().await.push(entry);
    }

    pub async fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.read().await.clone()
    }

    pub async fn lines(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Most recent entry containing `needle`.
    pub async fn find_latest(&self, needle: &str) -> Option<ActivityEntry> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .find(|entry| entry.message.contains(needle))
            .cloned()
    }
}
