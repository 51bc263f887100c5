//! Long-running backend operations, keyed by a caller-chosen string and
//! upserted from their status messages.

use chrono::{DateTime, Utc};
use shared::domain::TaskKey;
use tracing::{debug, info};

use crate::error::PreconditionError;

pub const ENGINE_SETUP_TASK: &str = "engine-setup";
pub const REPAIR_TASK: &str = "repair-task";

const COMPLETE_MARKERS: [&str; 3] = ["success", "complete", "installed"];
const ERROR_MARKERS: [&str; 2] = ["error", "failed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    EngineDeployment,
    Repair,
    Generic,
}

impl TaskKind {
    pub fn for_key(key: &TaskKey) -> Self {
        match key.as_str() {
            ENGINE_SETUP_TASK => Self::EngineDeployment,
            REPAIR_TASK => Self::Repair,
            _ => Self::Generic,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::EngineDeployment => "Engine Deployment",
            Self::Repair => "DirectX Repair",
            Self::Generic => "Background Task",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusClassification {
    pub is_complete: bool,
    pub has_error: bool,
}

/// Classifies a free-form backend status line by case-insensitive keywords.
pub fn classify_status(message: &str) -> StatusClassification {
    let lower = message.to_lowercase();
    StatusClassification {
        is_complete: COMPLETE_MARKERS.iter().any(|marker| lower.contains(marker)),
        has_error: ERROR_MARKERS.iter().any(|marker| lower.contains(marker)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    InProgress,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundTask {
    pub key: TaskKey,
    pub title: String,
    pub kind: TaskKind,
    pub status: String,
    pub is_complete: bool,
    pub has_error: bool,
    pub updated_at: DateTime<Utc>,
}

impl BackgroundTask {
    /// An error in the latest message outranks a completion keyword in the same message.
    pub fn state(&self) -> TaskState {
        if self.has_error {
            TaskState::Failed
        } else if self.is_complete {
            TaskState::Complete
        } else {
            TaskState::InProgress
        }
    }

    pub fn is_settled(&self) -> bool {
        self.is_complete || self.has_error
    }

    fn apply(&mut self, message: &str) {
        let classification = classify_status(message);
        self.status = message.to_string();
        self.is_complete = classification.is_complete;
        self.has_error = classification.has_error;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskUpdate {
    Created,
    Updated,
}

/// Tasks in first-report order. Holds at most one task per key.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTaskRegistry {
    tasks: Vec<BackgroundTask>,
}

impl BackgroundTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_status(&mut self, key: impl Into<TaskKey>, message: &str) -> TaskUpdate {
        let key = key.into();
        if let Some(task) = self.tasks.iter_mut().find(|task| task.key == key) {
            let previous = task.state();
            task.apply(message);
            if task.state() != previous {
                info!(task_key = %key, from = ?previous, to = ?task.state(), "task state changed");
            } else {
                debug!(task_key = %key, status = message, "task status updated");
            }
            return TaskUpdate::Updated;
        }

        let kind = TaskKind::for_key(&key);
        let mut task = BackgroundTask {
            key: key.clone(),
            title: kind.title().to_string(),
            kind,
            status: String::new(),
            is_complete: false,
            has_error: false,
            updated_at: Utc::now(),
        };
        task.apply(message);
        info!(task_key = %key, state = ?task.state(), "task registered");
        self.tasks.push(task);
        TaskUpdate::Created
    }

    /// Removes a settled task. In-progress tasks cannot be dismissed.
    pub fn dismiss(&mut self, key: &TaskKey) -> Result<BackgroundTask, PreconditionError> {
        let index = self
            .tasks
            .iter()
            .position(|task| &task.key == key)
            .ok_or_else(|| PreconditionError::UnknownTask(key.clone()))?;
        if !self.tasks[index].is_settled() {
            return Err(PreconditionError::TaskInProgress(key.clone()));
        }
        info!(task_key = %key, "task dismissed");
        Ok(self.tasks.remove(index))
    }

    pub fn get(&self, key: &TaskKey) -> Option<&BackgroundTask> {
        self.tasks.iter().find(|task| &task.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackgroundTask> {
        self.tasks.iter()
    }

    pub fn snapshot(&self) -> Vec<BackgroundTask> {
        self.tasks.clone()
    }

    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_settled()).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/task_registry_tests.rs"]
mod tests;
