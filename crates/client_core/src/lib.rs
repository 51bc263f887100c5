use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{
        Bottle, BottleId, BottleTemplate, DetectedApp, EnvironmentKind, GraphicsBackend,
        RegisteredApp, WineRunner,
    },
    protocol::PushEvent,
};
use tokio::sync::broadcast;

pub mod activity_log;
pub mod error;
pub mod event_bridge;
pub mod http_backend;
pub mod reconciler;
pub mod session;
pub mod task_registry;
pub mod workflow;

pub use activity_log::{ActivityEntry, ActivityLog};
pub use error::{ControllerError, PreconditionError, WorkflowError};
pub use event_bridge::EventBridge;
pub use http_backend::HttpBackend;
pub use reconciler::{reconcile, AppEntry, AppLibrary, AppSource, ReconciledApps};
pub use session::{Delivery, Refresh, SessionController, SessionSnapshot, ViewTab};
pub use task_registry::{
    classify_status, BackgroundTask, BackgroundTaskRegistry, StatusClassification, TaskKind,
    TaskState, TaskUpdate, ENGINE_SETUP_TASK, REPAIR_TASK,
};
pub use workflow::{
    BottleCreationWorkflow, CreationRequest, CreationStatus, CreationStep, WizardCatalog,
};

/// Everything the controller asks of the execution backend.
///
/// Calls are request/response; progress of long-running work arrives on
/// [`BottleBackend::subscribe_events`].
#[async_trait]
pub trait BottleBackend: Send + Sync {
    async fn list_bottles(&self) -> Result<Vec<Bottle>>;
    async fn bottle_detail(&self, bottle_id: &BottleId) -> Result<Bottle>;
    async fn create_bottle(&self, name: &str, environment: EnvironmentKind) -> Result<Bottle>;
    async fn delete_bottle(&self, bottle_id: &BottleId) -> Result<()>;
    async fn rename_bottle(&self, bottle_id: &BottleId, new_name: &str) -> Result<()>;
    async fn set_bottle_cover(&self, bottle_id: &BottleId, cover: &str) -> Result<()>;
    async fn scan_installed_apps(&self, bottle_id: &BottleId) -> Result<Vec<DetectedApp>>;
    async fn pin_app(&self, bottle_id: &BottleId, app: &RegisteredApp) -> Result<()>;
    async fn unpin_app(&self, bottle_id: &BottleId, exe_path: &str) -> Result<()>;
    async fn set_bottle_engine(&self, bottle_id: &BottleId, engine_path: &Path) -> Result<()>;
    async fn reset_bottle_engine(&self, bottle_id: &BottleId) -> Result<()>;
    async fn initialize_bottle_runtime(&self, bottle_id: &BottleId) -> Result<()>;
    async fn install_template_dependency(&self, bottle_id: &BottleId) -> Result<()>;
    async fn run_executable(&self, path: &str, bottle_id: &BottleId) -> Result<()>;
    async fn list_runner_candidates(&self) -> Result<Vec<WineRunner>>;
    async fn list_templates(&self) -> Result<Vec<BottleTemplate>>;
    async fn check_engine_readiness(&self) -> Result<bool>;
    /// Starts an engine download; progress is pushed on `engine-status`.
    async fn deploy_engine(&self) -> Result<()>;
    /// Starts a graphics runtime repair; progress is pushed on `status-update`.
    async fn repair_graphics_runtime(&self, bottle_id: &BottleId) -> Result<()>;
    async fn verify_metal_libraries(&self, bottle_id: &BottleId) -> Result<bool>;
    async fn install_metal_libraries(&self, bottle_id: &BottleId) -> Result<()>;
    async fn set_graphics_backend(
        &self,
        bottle_id: &BottleId,
        backend: GraphicsBackend,
    ) -> Result<()>;
    /// Reveals the bottle directory in the host's file manager.
    async fn open_bottle_dir(&self, bottle_id: &BottleId) -> Result<()>;
    fn subscribe_events(&self) -> broadcast::Receiver<PushEvent>;
}

#[cfg(test)]
#[path = "tests/fake_backend.rs"]
pub(crate) mod fake_backend;
