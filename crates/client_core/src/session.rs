//! Selected-bottle session: bottle list, selection, app library, task panel.
//!
//! Every backend call captures the selected bottle when it is issued and
//! compares it with the selection when it completes. Results for a bottle
//! that is no longer selected are dropped without touching any state.

use std::{path::Path, sync::Arc};

use shared::domain::{Bottle, BottleId, GraphicsBackend, RegisteredApp, TaskKey};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    activity_log::ActivityLog,
    error::{ControllerError, PreconditionError, WorkflowError},
    reconciler::{AppLibrary, ReconciledApps},
    task_registry::{
        BackgroundTask, BackgroundTaskRegistry, TaskUpdate, ENGINE_SETUP_TASK, REPAIR_TASK,
    },
    workflow::{BottleCreationWorkflow, CreationRequest},
    BottleBackend,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewTab {
    #[default]
    Library,
    Engine,
    Graphics,
}

/// Whether a completed call changed the session or arrived for a bottle that
/// is no longer selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Applied,
    Discarded,
}

/// Outcome of the rescan and detail refetch that run together on selection
/// and on `library-changed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refresh {
    pub scan: Result<Delivery, ControllerError>,
    pub detail: Result<Delivery, ControllerError>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub bottles: Vec<Bottle>,
    pub selected: Option<BottleId>,
    pub detail: Option<Bottle>,
    pub apps: ReconciledApps,
    pub active_tab: ViewTab,
    pub scanning: bool,
    pub engine_ready: Option<bool>,
    /// D3DMetal libraries present in the selected bottle, once checked.
    pub metal_libraries: Option<bool>,
    pub graphics_backend: Option<GraphicsBackend>,
    pub tasks: Vec<BackgroundTask>,
}

impl SessionSnapshot {
    pub fn bottle(&self, bottle_id: &BottleId) -> Option<&Bottle> {
        self.bottles.iter().find(|bottle| &bottle.id == bottle_id)
    }
}

/// Identifies one issued scan within one selection.
#[derive(Debug, Clone, Copy)]
struct ScanTicket {
    selection: u64,
    scan: u64,
}

#[derive(Default)]
struct SessionState {
    bottles: Vec<Bottle>,
    selected: Option<BottleId>,
    detail: Option<Bottle>,
    library: AppLibrary,
    active_tab: ViewTab,
    engine_ready: Option<bool>,
    metal_libraries: Option<bool>,
    graphics_backend: Option<GraphicsBackend>,
    /// Bumped on every select and deselect.
    selection_epoch: u64,
    latest_scan: u64,
    scans_in_flight: usize,
}

impl SessionState {
    fn is_selected(&self, bottle_id: &BottleId) -> bool {
        self.selected.as_ref() == Some(bottle_id)
    }

    fn reset_bottle_view(&mut self) {
        self.active_tab = ViewTab::default();
        self.metal_libraries = None;
        self.graphics_backend = None;
        self.selection_epoch += 1;
        self.scans_in_flight = 0;
    }

    fn clear_selection(&mut self) {
        self.selected = None;
        self.detail = None;
        self.library = AppLibrary::default();
        self.reset_bottle_view();
    }

    fn begin_scan(&mut self) -> ScanTicket {
        self.latest_scan += 1;
        self.scans_in_flight += 1;
        ScanTicket {
            selection: self.selection_epoch,
            scan: self.latest_scan,
        }
    }

    /// Marks the scan finished. True when its result is still wanted: it
    /// belongs to the current selection and no newer scan was issued since.
    fn finish_scan(&mut self, ticket: ScanTicket) -> bool {
        if ticket.selection != self.selection_epoch {
            return false;
        }
        self.scans_in_flight = self.scans_in_flight.saturating_sub(1);
        ticket.scan == self.latest_scan
    }

    fn update_bottle(&mut self, bottle_id: &BottleId, apply: impl Fn(&mut Bottle)) {
        if let Some(bottle) = self.bottles.iter_mut().find(|b| &b.id == bottle_id) {
            apply(bottle);
        }
        if let Some(detail) = self.detail.as_mut().filter(|b| &b.id == bottle_id) {
            apply(detail);
        }
    }
}

pub struct SessionController {
    backend: Arc<dyn BottleBackend>,
    inner: Mutex<SessionState>,
    tasks: RwLock<BackgroundTaskRegistry>,
    activity: ActivityLog,
}

impl SessionController {
    pub fn new(backend: Arc<dyn BottleBackend>, activity: ActivityLog) -> Arc<Self> {
        Arc::new(Self {
            backend,
            inner: Mutex::new(SessionState::default()),
            tasks: RwLock::new(BackgroundTaskRegistry::new()),
            activity,
        })
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// A creation workflow sharing this session's backend and activity log.
    pub fn creation_workflow(&self) -> BottleCreationWorkflow {
        BottleCreationWorkflow::new(Arc::clone(&self.backend), self.activity.clone())
    }

    pub async fn selected(&self) -> Option<BottleId> {
        self.inner.lock().await.selected.clone()
    }

    pub async fn load_bottles(&self) -> Result<Vec<Bottle>, ControllerError> {
        match self.backend.list_bottles().await {
            Ok(bottles) => {
                debug!(count = bottles.len(), "bottle list loaded");
                self.inner.lock().await.bottles = bottles.clone();
                Ok(bottles)
            }
            Err(err) => {
                self.activity
                    .record(format!("Error loading bottles: {err:#}"))
                    .await;
                Err(ControllerError::backend("list bottles", &err))
            }
        }
    }

    /// Selects `bottle_id`, resets the per-bottle view state and refreshes the
    /// app library from both sources in parallel.
    pub async fn select(&self, bottle_id: BottleId) -> Refresh {
        {
            let mut guard = self.inner.lock().await;
            let listed = guard
                .bottles
                .iter()
                .find(|bottle| bottle.id == bottle_id)
                .cloned();
            guard.library = AppLibrary::with_registry(
                listed
                    .as_ref()
                    .map(|bottle| bottle.app_registry.clone())
                    .unwrap_or_default(),
            );
            guard.detail = listed;
            guard.selected = Some(bottle_id.clone());
            guard.reset_bottle_view();
        }
        info!(bottle_id = %bottle_id, "bottle selected");
        self.refresh(&bottle_id).await
    }

    pub async fn deselect(&self) {
        let previous = {
            let mut guard = self.inner.lock().await;
            let previous = guard.selected.clone();
            guard.clear_selection();
            previous
        };
        if let Some(bottle_id) = previous {
            info!(bottle_id = %bottle_id, "bottle deselected");
        }
    }

    /// Re-runs the refresh pair for a `library-changed` push, but only when the
    /// event names the selected bottle.
    pub async fn handle_library_changed(&self, bottle_id: &BottleId) -> Option<Refresh> {
        if !self.inner.lock().await.is_selected(bottle_id) {
            debug!(bottle_id = %bottle_id, "library change for unselected bottle ignored");
            return None;
        }
        Some(self.refresh(bottle_id).await)
    }

    pub async fn rescan(&self) -> Result<Delivery, ControllerError> {
        let bottle_id = self.require_selection().await?;
        self.rescan_bottle(&bottle_id).await
    }

    pub async fn refetch_detail(&self) -> Result<Delivery, ControllerError> {
        let bottle_id = self.require_selection().await?;
        self.refetch_bottle(&bottle_id).await
    }

    /// Pins `exe_path` in the selected bottle, then refetches the registry.
    ///
    /// The name comes from `name`, else from the latest scan, else the path.
    pub async fn pin_app(
        &self,
        exe_path: &str,
        name: Option<&str>,
    ) -> Result<Delivery, ControllerError> {
        let (bottle_id, app) = {
            let guard = self.inner.lock().await;
            let bottle_id = guard.selected.clone().ok_or(ControllerError::NoSelection)?;
            let detected = guard
                .library
                .detected()
                .iter()
                .find(|app| app.exe_path == exe_path);
            let app = match (name, detected) {
                (Some(name), _) => RegisteredApp::pinned(exe_path, name),
                (None, Some(detected)) => RegisteredApp::pinned_from_detected(detected),
                (None, None) => RegisteredApp::pinned(exe_path, file_name(exe_path)),
            };
            (bottle_id, app)
        };

        if let Err(err) = self.backend.pin_app(&bottle_id, &app).await {
            self.activity
                .record(format!("Error pinning app: {err:#}"))
                .await;
            return Err(ControllerError::backend("pin app", &err));
        }
        info!(bottle_id = %bottle_id, exe_path, "app pinned");
        self.refetch_bottle(&bottle_id).await
    }

    pub async fn unpin_app(&self, exe_path: &str) -> Result<Delivery, ControllerError> {
        let bottle_id = self.require_selection().await?;
        if let Err(err) = self.backend.unpin_app(&bottle_id, exe_path).await {
            self.activity
                .record(format!("Error unpinning app: {err:#}"))
                .await;
            return Err(ControllerError::backend("unpin app", &err));
        }
        info!(bottle_id = %bottle_id, exe_path, "app unpinned");
        self.refetch_bottle(&bottle_id).await
    }

    pub async fn run_executable(&self, exe_path: &str) -> Result<(), ControllerError> {
        let bottle_id = self.require_selection().await?;
        self.activity
            .record(format!("Launching {}...", file_name(exe_path)))
            .await;
        if let Err(err) = self.backend.run_executable(exe_path, &bottle_id).await {
            warn!(bottle_id = %bottle_id, exe_path, error = %err, "launch rejected");
            self.activity
                .record(format!("Launch error: {err:#}"))
                .await;
            return Err(ControllerError::backend("run executable", &err));
        }
        Ok(())
    }

    /// Deletes a bottle; deleting the selected one deselects it.
    pub async fn delete_bottle(&self, bottle_id: &BottleId) -> Result<(), ControllerError> {
        if let Err(err) = self.backend.delete_bottle(bottle_id).await {
            self.activity
                .record(format!("Error deleting bottle: {err:#}"))
                .await;
            return Err(ControllerError::backend("delete bottle", &err));
        }
        let name = {
            let mut guard = self.inner.lock().await;
            if guard.is_selected(bottle_id) {
                guard.clear_selection();
            }
            let position = guard.bottles.iter().position(|b| &b.id == bottle_id);
            position.map(|index| guard.bottles.remove(index).name)
        };
        self.activity
            .record(format!(
                "Deleted bottle {}",
                name.unwrap_or_else(|| bottle_id.to_string())
            ))
            .await;
        Ok(())
    }

    pub async fn rename_bottle(
        &self,
        bottle_id: &BottleId,
        new_name: &str,
    ) -> Result<(), ControllerError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(PreconditionError::MissingName.into());
        }
        if let Err(err) = self.backend.rename_bottle(bottle_id, new_name).await {
            self.activity
                .record(format!("Error renaming bottle: {err:#}"))
                .await;
            return Err(ControllerError::backend("rename bottle", &err));
        }
        self.inner
            .lock()
            .await
            .update_bottle(bottle_id, |bottle| bottle.name = new_name.to_string());
        info!(bottle_id = %bottle_id, name = new_name, "bottle renamed");
        Ok(())
    }

    pub async fn set_cover(&self, bottle_id: &BottleId, cover: &str) -> Result<(), ControllerError> {
        if let Err(err) = self.backend.set_bottle_cover(bottle_id, cover).await {
            self.activity
                .record(format!("Error setting cover: {err:#}"))
                .await;
            return Err(ControllerError::backend("set bottle cover", &err));
        }
        self.inner
            .lock()
            .await
            .update_bottle(bottle_id, |bottle| bottle.cover = Some(cover.to_string()));
        Ok(())
    }

    pub async fn set_engine(
        &self,
        bottle_id: &BottleId,
        engine_path: &Path,
    ) -> Result<(), ControllerError> {
        if let Err(err) = self.backend.set_bottle_engine(bottle_id, engine_path).await {
            self.activity
                .record(format!("Error setting engine: {err:#}"))
                .await;
            return Err(ControllerError::backend("set bottle engine", &err));
        }
        self.inner.lock().await.update_bottle(bottle_id, |bottle| {
            bottle.engine_path = Some(engine_path.to_path_buf())
        });
        self.activity
            .record(format!("Engine set to {}", engine_path.display()))
            .await;
        Ok(())
    }

    pub async fn reset_engine(&self, bottle_id: &BottleId) -> Result<(), ControllerError> {
        if let Err(err) = self.backend.reset_bottle_engine(bottle_id).await {
            self.activity
                .record(format!("Error resetting engine: {err:#}"))
                .await;
            return Err(ControllerError::backend("reset bottle engine", &err));
        }
        self.inner
            .lock()
            .await
            .update_bottle(bottle_id, |bottle| bottle.engine_path = None);
        self.activity.record("Engine reset to default").await;
        Ok(())
    }

    pub async fn check_engine_readiness(&self) -> Result<bool, ControllerError> {
        match self.backend.check_engine_readiness().await {
            Ok(ready) => {
                self.inner.lock().await.engine_ready = Some(ready);
                debug!(ready, "engine readiness checked");
                Ok(ready)
            }
            Err(err) => {
                self.activity
                    .record(format!("Error checking engine: {err:#}"))
                    .await;
                Err(ControllerError::backend("check engine readiness", &err))
            }
        }
    }

    /// Seeds the `engine-setup` task and asks the backend to deploy the engine.
    /// Progress arrives later on the `engine-status` channel.
    pub async fn deploy_engine(&self) -> Result<(), ControllerError> {
        self.report_status(ENGINE_SETUP_TASK, "Requesting engine deployment...")
            .await;
        let result = self.backend.deploy_engine().await;
        self.settle_request(ENGINE_SETUP_TASK, "deploy engine", result)
            .await
    }

    pub async fn repair_graphics(&self) -> Result<(), ControllerError> {
        let bottle_id = self.require_selection().await?;
        self.report_status(REPAIR_TASK, "Requesting graphics repair...")
            .await;
        let result = self.backend.repair_graphics_runtime(&bottle_id).await;
        self.settle_request(REPAIR_TASK, "repair graphics runtime", result)
            .await
    }

    /// Checks whether the selected bottle has the D3DMetal libraries.
    pub async fn verify_graphics(&self) -> Result<bool, ControllerError> {
        let bottle_id = self.require_selection().await?;
        self.verify_bottle_graphics(&bottle_id).await
    }

    /// Switches the selected bottle to `backend`, installing the D3DMetal
    /// libraries first when they are needed and missing. Returns whether the
    /// libraries are present afterwards.
    pub async fn apply_graphics_backend(
        &self,
        backend: GraphicsBackend,
    ) -> Result<bool, ControllerError> {
        let bottle_id = self.require_selection().await?;
        let installed = self.verify_bottle_graphics(&bottle_id).await?;

        if backend.needs_metal_libraries() && !installed {
            self.activity.record("Installing D3DMetal libraries...").await;
            if let Err(err) = self.backend.install_metal_libraries(&bottle_id).await {
                self.activity
                    .record(format!("Error installing D3DMetal: {err:#}"))
                    .await;
                return Err(ControllerError::backend("install metal libraries", &err));
            }
            info!(bottle_id = %bottle_id, "metal libraries installed");
        }

        if let Err(err) = self.backend.set_graphics_backend(&bottle_id, backend).await {
            self.activity
                .record(format!("Error setting graphics backend: {err:#}"))
                .await;
            return Err(ControllerError::backend("set graphics backend", &err));
        }
        {
            let mut guard = self.inner.lock().await;
            if guard.is_selected(&bottle_id) {
                guard.graphics_backend = Some(backend);
            }
        }
        self.activity
            .record(format!("Graphics backend set to {}", backend.label()))
            .await;
        self.verify_bottle_graphics(&bottle_id).await
    }

    /// Reveals the bottle's directory in the host file manager.
    pub async fn open_bottle_dir(&self, bottle_id: &BottleId) -> Result<(), ControllerError> {
        if let Err(err) = self.backend.open_bottle_dir(bottle_id).await {
            self.activity
                .record(format!("Error opening bottle folder: {err:#}"))
                .await;
            return Err(ControllerError::backend("open bottle directory", &err));
        }
        Ok(())
    }

    pub async fn report_status(&self, key: impl Into<TaskKey>, message: &str) -> TaskUpdate {
        self.tasks.write().await.report_status(key, message)
    }

    pub async fn dismiss_task(&self, key: &TaskKey) -> Result<BackgroundTask, ControllerError> {
        Ok(self.tasks.write().await.dismiss(key)?)
    }

    pub async fn tasks(&self) -> Vec<BackgroundTask> {
        self.tasks.read().await.snapshot()
    }

    pub async fn task(&self, key: &TaskKey) -> Option<BackgroundTask> {
        self.tasks.read().await.get(key).cloned()
    }

    pub async fn set_active_tab(&self, tab: ViewTab) -> Result<(), ControllerError> {
        let mut guard = self.inner.lock().await;
        if guard.selected.is_none() {
            return Err(ControllerError::NoSelection);
        }
        guard.active_tab = tab;
        Ok(())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let tasks = self.tasks().await;
        let guard = self.inner.lock().await;
        SessionSnapshot {
            bottles: guard.bottles.clone(),
            selected: guard.selected.clone(),
            detail: guard.detail.clone(),
            apps: guard.library.views().clone(),
            active_tab: guard.active_tab,
            scanning: guard.scans_in_flight > 0,
            engine_ready: guard.engine_ready,
            metal_libraries: guard.metal_libraries,
            graphics_backend: guard.graphics_backend,
            tasks,
        }
    }

    /// Runs the creation workflow and reloads the bottle list whenever a
    /// bottle was provisioned, including partially built ones.
    pub async fn create_bottle(
        &self,
        workflow: &BottleCreationWorkflow,
        request: &CreationRequest,
    ) -> Result<Bottle, WorkflowError> {
        let result = workflow.run(request).await;
        let provisioned = match &result {
            Ok(_) => true,
            Err(WorkflowError::StepFailed { bottle_id, .. }) => bottle_id.is_some(),
            Err(WorkflowError::Precondition(_)) => false,
        };
        if provisioned {
            let _ = self.load_bottles().await;
        }
        result
    }

    async fn require_selection(&self) -> Result<BottleId, ControllerError> {
        self.selected().await.ok_or(ControllerError::NoSelection)
    }

    async fn refresh(&self, bottle_id: &BottleId) -> Refresh {
        let (scan, detail) = tokio::join!(
            self.rescan_bottle(bottle_id),
            self.refetch_bottle(bottle_id)
        );
        Refresh { scan, detail }
    }

    async fn rescan_bottle(&self, bottle_id: &BottleId) -> Result<Delivery, ControllerError> {
        let ticket = {
            let mut guard = self.inner.lock().await;
            if !guard.is_selected(bottle_id) {
                return Ok(Delivery::Discarded);
            }
            guard.begin_scan()
        };

        let result = self.backend.scan_installed_apps(bottle_id).await;

        let mut guard = self.inner.lock().await;
        let latest = guard.finish_scan(ticket);
        if !guard.is_selected(bottle_id) {
            debug!(bottle_id = %bottle_id, "stale scan discarded");
            return Ok(Delivery::Discarded);
        }
        if !latest {
            debug!(bottle_id = %bottle_id, "superseded scan discarded");
            return Ok(Delivery::Discarded);
        }
        match result {
            Ok(detected) => {
                debug!(bottle_id = %bottle_id, count = detected.len(), "scan applied");
                guard.library.apply_scan(detected);
                Ok(Delivery::Applied)
            }
            Err(err) => {
                drop(guard);
                warn!(bottle_id = %bottle_id, error = %err, "scan failed");
                self.activity.record(format!("Scan error: {err:#}")).await;
                Err(ControllerError::backend("scan installed apps", &err))
            }
        }
    }

    async fn refetch_bottle(&self, bottle_id: &BottleId) -> Result<Delivery, ControllerError> {
        let result = self.backend.bottle_detail(bottle_id).await;

        let mut guard = self.inner.lock().await;
        if !guard.is_selected(bottle_id) {
            debug!(bottle_id = %bottle_id, "stale bottle detail discarded");
            return Ok(Delivery::Discarded);
        }
        match result {
            Ok(bottle) => {
                guard.library.apply_registry(bottle.app_registry.clone());
                if let Some(listed) = guard.bottles.iter_mut().find(|b| b.id == bottle.id) {
                    *listed = bottle.clone();
                }
                guard.detail = Some(bottle);
                Ok(Delivery::Applied)
            }
            Err(err) => {
                drop(guard);
                warn!(bottle_id = %bottle_id, error = %err, "bottle detail refetch failed");
                self.activity
                    .record(format!("Error loading bottle details: {err:#}"))
                    .await;
                Err(ControllerError::backend("get bottle detail", &err))
            }
        }
    }

    async fn verify_bottle_graphics(&self, bottle_id: &BottleId) -> Result<bool, ControllerError> {
        match self.backend.verify_metal_libraries(bottle_id).await {
            Ok(installed) => {
                let mut guard = self.inner.lock().await;
                if guard.is_selected(bottle_id) {
                    guard.metal_libraries = Some(installed);
                    if guard.graphics_backend.is_none() {
                        guard.graphics_backend = Some(GraphicsBackend::preferred(installed));
                    }
                }
                debug!(bottle_id = %bottle_id, installed, "metal libraries checked");
                Ok(installed)
            }
            Err(err) => {
                self.activity
                    .record(format!("Error checking graphics libraries: {err:#}"))
                    .await;
                Err(ControllerError::backend("verify metal libraries", &err))
            }
        }
    }

    async fn settle_request(
        &self,
        key: &str,
        operation: &'static str,
        result: anyhow::Result<()>,
    ) -> Result<(), ControllerError> {
        match result {
            Ok(()) => {
                info!(task_key = key, "{operation} requested");
                Ok(())
            }
            Err(err) => {
                let status = format!("Error: {err:#}");
                self.report_status(key, &status).await;
                self.activity.record(status).await;
                Err(ControllerError::backend(operation, &err))
            }
        }
    }
}

/// Last path component, accepting both separator styles.
fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(path)
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
