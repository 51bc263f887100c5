//! Routes backend push events into the session.

use std::sync::Arc;

use shared::{domain::TaskKey, protocol::PushEvent};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{debug, warn};

use crate::{
    session::{Refresh, SessionController},
    task_registry::{TaskUpdate, ENGINE_SETUP_TASK, REPAIR_TASK},
};

/// Where a push event ended up.
#[derive(Debug)]
pub enum Routed {
    Task { key: TaskKey, update: TaskUpdate },
    /// The refresh runs on its own task so status routing never waits on it.
    LibraryRefresh(JoinHandle<Option<Refresh>>),
}

#[derive(Clone)]
pub struct EventBridge {
    session: Arc<SessionController>,
}

impl EventBridge {
    pub fn new(session: Arc<SessionController>) -> Self {
        Self { session }
    }

    pub async fn route(&self, event: PushEvent) -> Routed {
        debug!(channel = event.channel(), "push event received");
        match event {
            PushEvent::StatusUpdate(message) => self.task_status(REPAIR_TASK, &message).await,
            PushEvent::EngineStatus(message) => {
                self.task_status(ENGINE_SETUP_TASK, &message).await
            }
            PushEvent::LibraryChanged(bottle_id) => {
                let session = Arc::clone(&self.session);
                Routed::LibraryRefresh(tokio::spawn(async move {
                    session.handle_library_changed(&bottle_id).await
                }))
            }
        }
    }

    /// Routes every event from `events` until the sender side closes.
    pub fn spawn(self, events: broadcast::Receiver<PushEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut stream = BroadcastStream::new(events);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => {
                        let _ = self.route(event).await;
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "push event receiver lagged; events dropped");
                    }
                }
            }
            debug!("push event stream closed");
        })
    }

    async fn task_status(&self, key: &str, message: &str) -> Routed {
        let update = self.session.report_status(key, message).await;
        Routed::Task {
            key: TaskKey::from(key),
            update,
        }
    }
}

#[cfg(test)]
#[path = "tests/event_bridge_tests.rs"]
mod tests;
