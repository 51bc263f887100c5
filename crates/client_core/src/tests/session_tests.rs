use super::*;
use crate::{
    fake_backend::{detected, pinned, runner, template, FakeBackend},
    reconciler::AppSource,
    task_registry::TaskState,
};
use shared::domain::{RunnerTier, STEAM_GAMING_TEMPLATE};
use std::path::PathBuf;

const GAME: &str = "C:/Program Files/Game/game.exe";
const LAUNCHER: &str = "C:/Program Files/Steam/steam.exe";
const UNINSTALL: &str = "C:/Program Files/Game/uninstall.exe";

async fn controller_with(bottles: &[&str]) -> (Arc<FakeBackend>, Arc<SessionController>) {
    let backend = FakeBackend::new();
    for id in bottles {
        backend.add_bottle(id).await;
    }
    let controller = SessionController::new(backend.clone(), ActivityLog::new());
    controller.load_bottles().await.expect("load bottles");
    (backend, controller)
}

fn id(value: &str) -> BottleId {
    BottleId::from(value)
}

#[tokio::test]
async fn selecting_runs_scan_and_detail_and_resets_tab() {
    let (backend, controller) = controller_with(&["games"]).await;
    backend
        .set_registry("games", vec![pinned(LAUNCHER, "Steam")])
        .await;
    backend
        .set_scan(
            "games",
            vec![
                detected(GAME, "game", true),
                detected(UNINSTALL, "uninstall", false),
            ],
        )
        .await;

    let refresh = controller.select(id("games")).await;
    assert_eq!(refresh.scan, Ok(Delivery::Applied));
    assert_eq!(refresh.detail, Ok(Delivery::Applied));
    controller
        .set_active_tab(ViewTab::Graphics)
        .await
        .expect("tab switch");

    controller.select(id("games")).await;
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.selected, Some(id("games")));
    assert_eq!(snapshot.active_tab, ViewTab::Library);
    assert!(!snapshot.scanning);
    let priority: Vec<&str> = snapshot
        .apps
        .priority
        .iter()
        .map(|app| app.exe_path.as_str())
        .collect();
    assert_eq!(priority, vec![LAUNCHER, GAME]);
    assert_eq!(snapshot.apps.secondary.len(), 1);
    assert_eq!(backend.call_count("scan_installed_apps:games").await, 2);
    assert_eq!(backend.call_count("bottle_detail:games").await, 2);
}

#[tokio::test]
async fn deselecting_during_scan_then_selecting_another_shows_only_the_second() {
    let (backend, controller) = controller_with(&["alpha", "beta"]).await;
    backend
        .set_scan("alpha", vec![detected(GAME, "game", true)])
        .await;
    backend
        .set_scan("beta", vec![detected(UNINSTALL, "uninstall", false)])
        .await;
    let gate = backend.gate_scan("alpha").await;

    let first = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.select(id("alpha")).await }
    });
    backend.wait_for_call("scan_installed_apps:alpha").await;

    controller.deselect().await;
    let second = controller.select(id("beta")).await;
    assert_eq!(second.scan, Ok(Delivery::Applied));

    gate.send(()).expect("alpha scan still waiting");
    let first = first.await.expect("select task");
    assert_eq!(first.scan, Ok(Delivery::Discarded));

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.selected, Some(id("beta")));
    assert!(snapshot.apps.find(GAME).is_none());
    assert!(snapshot.apps.find(UNINSTALL).is_some());
    assert_eq!(snapshot.apps.len(), 1);
}

#[tokio::test]
async fn deselect_drops_per_bottle_state() {
    let (backend, controller) = controller_with(&["games"]).await;
    backend
        .set_scan("games", vec![detected(GAME, "game", true)])
        .await;
    controller.select(id("games")).await;

    controller.deselect().await;

    let snapshot = controller.snapshot().await;
    assert!(snapshot.selected.is_none());
    assert!(snapshot.detail.is_none());
    assert!(snapshot.apps.is_empty());
    assert_eq!(snapshot.bottles.len(), 1);
    assert_eq!(controller.rescan().await, Err(ControllerError::NoSelection));
    assert_eq!(
        controller.set_active_tab(ViewTab::Engine).await,
        Err(ControllerError::NoSelection)
    );
}

#[tokio::test]
async fn library_change_for_other_bottle_is_ignored() {
    let (backend, controller) = controller_with(&["alpha", "beta"]).await;
    controller.select(id("alpha")).await;

    assert!(controller.handle_library_changed(&id("beta")).await.is_none());
    assert_eq!(backend.call_count("scan_installed_apps:beta").await, 0);

    let refresh = controller
        .handle_library_changed(&id("alpha"))
        .await
        .expect("selected bottle refreshes");
    assert_eq!(refresh.scan, Ok(Delivery::Applied));
    assert_eq!(backend.call_count("scan_installed_apps:alpha").await, 2);
}

#[tokio::test]
async fn failed_rescan_keeps_previous_views() {
    let (backend, controller) = controller_with(&["games"]).await;
    backend
        .set_scan("games", vec![detected(GAME, "game", true)])
        .await;
    controller.select(id("games")).await;
    let before = controller.snapshot().await.apps;

    backend.fail("scan_installed_apps").await;
    let err = controller.rescan().await.expect_err("scan rejected");

    assert_eq!(
        err,
        ControllerError::Backend {
            operation: "scan installed apps",
            message: "scan_installed_apps rejected by backend".to_string(),
        }
    );
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.apps, before);
    assert!(!snapshot.scanning);
    assert!(controller
        .activity()
        .find_latest("Scan error: scan_installed_apps rejected")
        .await
        .is_some());
}

#[tokio::test]
async fn pinning_refetches_registry_and_survives_later_scans() {
    let (backend, controller) = controller_with(&["games"]).await;
    backend
        .set_scan("games", vec![detected(UNINSTALL, "uninstall", false)])
        .await;
    controller.select(id("games")).await;
    assert!(!controller.snapshot().await.apps.in_priority(UNINSTALL));

    let delivery = controller
        .pin_app(UNINSTALL, Some("Uninstaller"))
        .await
        .expect("pin");
    assert_eq!(delivery, Delivery::Applied);

    controller.rescan().await.expect("rescan");
    let snapshot = controller.snapshot().await;
    let entry = snapshot.apps.find(UNINSTALL).expect("still listed");
    assert!(snapshot.apps.in_priority(UNINSTALL));
    assert!(entry.pinned);
    assert_eq!(entry.name, "Uninstaller");
    assert_eq!(entry.source, AppSource::Both);
    assert_eq!(snapshot.apps.len(), 1);
}

#[tokio::test]
async fn pin_without_name_uses_scanned_name() {
    let (backend, controller) = controller_with(&["games"]).await;
    backend
        .set_scan("games", vec![detected(GAME, "Game", false)])
        .await;
    controller.select(id("games")).await;

    controller.pin_app(GAME, None).await.expect("pin");
    controller
        .pin_app("C:/tools/Editor.exe", None)
        .await
        .expect("pin unscanned");

    let stored = backend.stored_bottle("games").await.expect("bottle");
    let names: Vec<&str> = stored
        .app_registry
        .iter()
        .map(|app| app.name.as_str())
        .collect();
    assert_eq!(names, vec!["Game", "Editor.exe"]);
}

#[tokio::test]
async fn unpinning_scan_priority_app_keeps_it_in_priority_view() {
    let (backend, controller) = controller_with(&["games"]).await;
    backend
        .set_registry("games", vec![pinned(GAME, "My Game")])
        .await;
    backend
        .set_scan("games", vec![detected(GAME, "game", true)])
        .await;
    controller.select(id("games")).await;

    controller.unpin_app(GAME).await.expect("unpin");

    let snapshot = controller.snapshot().await;
    let entry = snapshot.apps.find(GAME).expect("listed");
    assert!(snapshot.apps.in_priority(GAME));
    assert!(!entry.pinned);
    assert_eq!(entry.source, AppSource::Scan);
}

#[tokio::test]
async fn failed_pin_leaves_library_untouched() {
    let (backend, controller) = controller_with(&["games"]).await;
    backend
        .set_scan("games", vec![detected(UNINSTALL, "uninstall", false)])
        .await;
    controller.select(id("games")).await;
    let before = controller.snapshot().await.apps;
    backend.fail("pin_app").await;

    let err = controller
        .pin_app(UNINSTALL, None)
        .await
        .expect_err("pin rejected");

    assert!(matches!(
        err,
        ControllerError::Backend {
            operation: "pin app",
            ..
        }
    ));
    assert_eq!(controller.snapshot().await.apps, before);
    assert_eq!(backend.call_count("bottle_detail:games").await, 1);
    assert!(controller
        .activity()
        .find_latest("Error pinning app")
        .await
        .is_some());
}

#[tokio::test]
async fn deleting_selected_bottle_deselects_it() {
    let (_backend, controller) = controller_with(&["alpha", "beta"]).await;
    controller.select(id("alpha")).await;

    controller
        .delete_bottle(&id("alpha"))
        .await
        .expect("delete");

    let snapshot = controller.snapshot().await;
    assert!(snapshot.selected.is_none());
    assert_eq!(snapshot.bottles.len(), 1);
    assert!(snapshot.bottle(&id("beta")).is_some());
    assert!(controller
        .activity()
        .find_latest("Deleted bottle alpha")
        .await
        .is_some());
}

#[tokio::test]
async fn deleting_other_bottle_keeps_selection() {
    let (_backend, controller) = controller_with(&["alpha", "beta"]).await;
    controller.select(id("alpha")).await;

    controller.delete_bottle(&id("beta")).await.expect("delete");

    assert_eq!(controller.selected().await, Some(id("alpha")));
}

#[tokio::test]
async fn rename_and_engine_changes_update_list_and_detail() {
    let (backend, controller) = controller_with(&["games"]).await;
    controller.select(id("games")).await;

    assert_eq!(
        controller.rename_bottle(&id("games"), "  ").await,
        Err(ControllerError::Precondition(PreconditionError::MissingName))
    );
    controller
        .rename_bottle(&id("games"), "Weekend Games")
        .await
        .expect("rename");
    controller
        .set_engine(&id("games"), Path::new("/opt/gptk/bin/wine64"))
        .await
        .expect("set engine");
    controller
        .set_cover(&id("games"), "covers/games.png")
        .await
        .expect("cover");

    let snapshot = controller.snapshot().await;
    let detail = snapshot.detail.clone().expect("detail");
    assert_eq!(detail.name, "Weekend Games");
    assert_eq!(detail.engine_path, Some(PathBuf::from("/opt/gptk/bin/wine64")));
    assert_eq!(detail.cover.as_deref(), Some("covers/games.png"));
    assert_eq!(
        snapshot.bottle(&id("games")).map(|b| b.name.as_str()),
        Some("Weekend Games")
    );

    controller
        .reset_engine(&id("games"))
        .await
        .expect("reset engine");
    let stored = backend.stored_bottle("games").await.expect("stored");
    assert!(stored.engine_path.is_none());
    assert!(controller
        .snapshot()
        .await
        .detail
        .expect("detail")
        .engine_path
        .is_none());
}

#[tokio::test]
async fn launching_logs_file_name_and_reports_rejection() {
    let (backend, controller) = controller_with(&["games"]).await;
    controller.select(id("games")).await;

    controller.run_executable(GAME).await.expect("launch");
    assert!(controller
        .activity()
        .find_latest("Launching game.exe...")
        .await
        .is_some());

    backend.fail("run_executable").await;
    controller
        .run_executable(GAME)
        .await
        .expect_err("launch rejected");
    assert!(controller
        .activity()
        .find_latest("Launch error: run_executable rejected")
        .await
        .is_some());
}

#[tokio::test]
async fn engine_readiness_is_cached_in_snapshot() {
    let (backend, controller) = controller_with(&[]).await;
    assert_eq!(controller.snapshot().await.engine_ready, None);

    backend.set_engine_ready(true).await;
    assert_eq!(controller.check_engine_readiness().await, Ok(true));
    assert_eq!(controller.snapshot().await.engine_ready, Some(true));
}

#[tokio::test]
async fn rejected_deployment_marks_engine_task_failed() {
    let (backend, controller) = controller_with(&[]).await;
    backend.fail("deploy_engine").await;

    controller
        .deploy_engine()
        .await
        .expect_err("deployment rejected");

    let task = controller
        .task(&TaskKey::from(ENGINE_SETUP_TASK))
        .await
        .expect("engine task seeded");
    assert_eq!(task.state(), TaskState::Failed);
    assert_eq!(task.status, "Error: deploy_engine rejected by backend");
    let dismissed = controller
        .dismiss_task(&task.key)
        .await
        .expect("failed task can be dismissed");
    assert_eq!(dismissed.title, "Engine Deployment");
}

#[tokio::test]
async fn repair_needs_selection_and_seeds_in_progress_task() {
    let (backend, controller) = controller_with(&["games"]).await;
    assert_eq!(
        controller.repair_graphics().await,
        Err(ControllerError::NoSelection)
    );

    controller.select(id("games")).await;
    controller.repair_graphics().await.expect("repair requested");

    assert_eq!(backend.call_count("repair_graphics_runtime:games").await, 1);
    let key = TaskKey::from(REPAIR_TASK);
    let err = controller
        .dismiss_task(&key)
        .await
        .expect_err("still running");
    assert_eq!(
        err,
        ControllerError::Precondition(PreconditionError::TaskInProgress(key))
    );
}

#[tokio::test]
async fn workflow_failure_at_step_three_still_lists_the_bottle() {
    let (backend, controller) = controller_with(&[]).await;
    backend.fail("initialize_bottle_runtime").await;
    let workflow = controller.creation_workflow();
    let request = CreationRequest::new("Steam Games")
        .with_runner(runner(RunnerTier::Enhanced, "/opt/gptk/bin/wine64"))
        .with_template(template(STEAM_GAMING_TEMPLATE, None));

    let err = controller
        .create_bottle(&workflow, &request)
        .await
        .expect_err("step 3 fails");

    assert!(matches!(
        err,
        WorkflowError::StepFailed {
            bottle_id: Some(_),
            ..
        }
    ));
    let snapshot = controller.snapshot().await;
    let listed = snapshot
        .bottle(&id("steam_games"))
        .expect("partial bottle stays listed");
    assert_eq!(
        listed.engine_path,
        Some(PathBuf::from("/opt/gptk/bin/wine64"))
    );
    assert_eq!(
        backend
            .call_count("install_template_dependency:steam_games")
            .await,
        0
    );
}

#[tokio::test]
async fn rejected_preconditions_do_not_reload_list() {
    let (backend, controller) = controller_with(&[]).await;
    let workflow = controller.creation_workflow();

    controller
        .create_bottle(&workflow, &CreationRequest::new("Games"))
        .await
        .expect_err("runner missing");

    assert_eq!(backend.call_count("list_bottles").await, 1);
}

#[tokio::test]
async fn scanning_flag_holds_until_every_overlapping_scan_finishes() {
    let (backend, controller) = controller_with(&["games"]).await;
    let first_gate = backend.gate_scan("games").await;
    let select = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.select(id("games")).await }
    });
    backend.wait_for_call("scan_installed_apps:games").await;
    assert!(controller.snapshot().await.scanning);

    let second_gate = backend.gate_scan("games").await;
    let rescan = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.rescan().await }
    });
    backend
        .wait_for_calls("scan_installed_apps:games", 2)
        .await;

    first_gate.send(()).expect("first scan still waiting");
    let first = select.await.expect("select task");
    assert_eq!(first.scan, Ok(Delivery::Discarded));
    assert!(controller.snapshot().await.scanning);

    second_gate.send(()).expect("second scan still waiting");
    assert_eq!(rescan.await.expect("rescan task"), Ok(Delivery::Applied));
    assert!(!controller.snapshot().await.scanning);
}

#[tokio::test]
async fn older_scan_finishing_last_cannot_overwrite_newer_results() {
    let (backend, controller) = controller_with(&["games"]).await;
    backend
        .set_scan("games", vec![detected(GAME, "game", true)])
        .await;
    controller.select(id("games")).await;

    let gate = backend.gate_scan("games").await;
    let older = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.rescan().await }
    });
    backend
        .wait_for_calls("scan_installed_apps:games", 2)
        .await;
    backend
        .set_scan("games", vec![detected(UNINSTALL, "uninstall", false)])
        .await;
    assert_eq!(controller.rescan().await, Ok(Delivery::Applied));

    gate.send(()).expect("older scan still waiting");
    assert_eq!(older.await.expect("rescan task"), Ok(Delivery::Discarded));

    let snapshot = controller.snapshot().await;
    assert!(snapshot.apps.find(GAME).is_none());
    assert!(snapshot.apps.find(UNINSTALL).is_some());
    assert!(!snapshot.scanning);
}

#[tokio::test]
async fn detail_arriving_after_switch_is_discarded() {
    let (backend, controller) = controller_with(&["alpha", "beta"]).await;
    backend
        .set_registry("alpha", vec![pinned(GAME, "Game")])
        .await;
    backend
        .set_registry("beta", vec![pinned(LAUNCHER, "Steam")])
        .await;
    let gate = backend.gate_detail("alpha").await;

    let first = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.select(id("alpha")).await }
    });
    backend.wait_for_call("bottle_detail:alpha").await;

    let second = controller.select(id("beta")).await;
    assert_eq!(second.detail, Ok(Delivery::Applied));

    gate.send(()).expect("alpha detail still waiting");
    let first = first.await.expect("select task");
    assert_eq!(first.detail, Ok(Delivery::Discarded));

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.detail.as_ref().map(|b| &b.id), Some(&id("beta")));
    assert!(snapshot.apps.find(LAUNCHER).is_some());
    assert!(snapshot.apps.find(GAME).is_none());
    let alpha = snapshot.bottle(&id("alpha")).expect("alpha listed");
    assert!(alpha.app_registry.is_empty());
}

#[tokio::test]
async fn refetch_after_pin_is_discarded_once_another_bottle_is_selected() {
    let (backend, controller) = controller_with(&["alpha", "beta"]).await;
    backend
        .set_registry("beta", vec![pinned(LAUNCHER, "Steam")])
        .await;
    controller.select(id("alpha")).await;

    let gate = backend.gate_detail("alpha").await;
    let pin = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.pin_app(GAME, Some("Game")).await }
    });
    backend.wait_for_calls("bottle_detail:alpha", 2).await;

    controller.select(id("beta")).await;
    gate.send(()).expect("refetch still waiting");
    assert_eq!(pin.await.expect("pin task"), Ok(Delivery::Discarded));

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.selected, Some(id("beta")));
    assert_eq!(snapshot.detail.as_ref().map(|b| &b.id), Some(&id("beta")));
    assert!(snapshot.apps.find(GAME).is_none());
    assert!(snapshot.apps.in_priority(LAUNCHER));
    let stored = backend.stored_bottle("alpha").await.expect("alpha stored");
    assert!(stored.registered_app(GAME).is_some());
}

fn graphics_calls(calls: Vec<String>) -> Vec<String> {
    calls
        .into_iter()
        .filter(|call| call.contains("metal") || call.contains("graphics"))
        .collect()
}

#[tokio::test]
async fn choosing_d3dmetal_installs_missing_libraries_before_switching() {
    let (backend, controller) = controller_with(&["games"]).await;
    controller.select(id("games")).await;

    let installed = controller
        .apply_graphics_backend(GraphicsBackend::D3DMetal)
        .await
        .expect("apply");

    assert!(installed);
    assert_eq!(
        graphics_calls(backend.calls().await),
        vec![
            "verify_metal_libraries:games",
            "install_metal_libraries:games",
            "set_graphics_backend:games",
            "verify_metal_libraries:games",
        ]
    );
    assert_eq!(
        backend.graphics_backend("games").await,
        Some(GraphicsBackend::D3DMetal)
    );
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.metal_libraries, Some(true));
    assert_eq!(snapshot.graphics_backend, Some(GraphicsBackend::D3DMetal));
    assert!(controller
        .activity()
        .find_latest("Graphics backend set to D3DMetal")
        .await
        .is_some());
}

#[tokio::test]
async fn other_backends_and_present_libraries_skip_install() {
    let (backend, controller) = controller_with(&["games"]).await;
    controller.select(id("games")).await;

    let installed = controller
        .apply_graphics_backend(GraphicsBackend::Dxvk)
        .await
        .expect("dxvk");
    assert!(!installed);
    assert_eq!(backend.graphics_backend("games").await, Some(GraphicsBackend::Dxvk));

    backend.set_metal_libraries("games", true).await;
    controller
        .apply_graphics_backend(GraphicsBackend::D3DMetal)
        .await
        .expect("d3dmetal");

    assert_eq!(backend.call_count("install_metal_libraries:games").await, 0);
    assert_eq!(backend.call_count("set_graphics_backend:games").await, 2);
}

#[tokio::test]
async fn failed_library_install_keeps_previous_backend() {
    let (backend, controller) = controller_with(&["games"]).await;
    controller.select(id("games")).await;
    backend.fail("install_metal_libraries").await;

    let err = controller
        .apply_graphics_backend(GraphicsBackend::D3DMetal)
        .await
        .expect_err("install rejected");

    assert!(matches!(
        err,
        ControllerError::Backend {
            operation: "install metal libraries",
            ..
        }
    ));
    assert_eq!(backend.call_count("set_graphics_backend:games").await, 0);
    assert_eq!(backend.graphics_backend("games").await, None);
    assert!(controller
        .activity()
        .find_latest("Error installing D3DMetal: install_metal_libraries rejected")
        .await
        .is_some());
}

#[tokio::test]
async fn graphics_check_needs_selection_and_resets_with_it() {
    let (backend, controller) = controller_with(&["alpha", "beta"]).await;
    assert_eq!(
        controller.verify_graphics().await,
        Err(ControllerError::NoSelection)
    );

    backend.set_metal_libraries("alpha", true).await;
    controller.select(id("alpha")).await;
    assert_eq!(controller.verify_graphics().await, Ok(true));
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.metal_libraries, Some(true));
    assert_eq!(snapshot.graphics_backend, Some(GraphicsBackend::D3DMetal));

    controller.select(id("beta")).await;
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.metal_libraries, None);
    assert_eq!(snapshot.graphics_backend, None);
    assert_eq!(controller.verify_graphics().await, Ok(false));
    assert_eq!(
        controller.snapshot().await.graphics_backend,
        Some(GraphicsBackend::Dxvk)
    );
}

#[tokio::test]
async fn opening_bottle_folder_reports_rejection() {
    let (backend, controller) = controller_with(&["games"]).await;

    controller
        .open_bottle_dir(&id("games"))
        .await
        .expect("open folder");
    assert_eq!(backend.call_count("open_bottle_dir:games").await, 1);

    let err = controller
        .open_bottle_dir(&id("missing"))
        .await
        .expect_err("unknown bottle");
    assert_eq!(
        err,
        ControllerError::Backend {
            operation: "open bottle directory",
            message: "Bottle not found".to_string(),
        }
    );
    assert!(controller
        .activity()
        .find_latest("Error opening bottle folder: Bottle not found")
        .await
        .is_some());
}

#[test]
fn file_name_handles_both_separators() {
    assert_eq!(file_name("C:\\Games\\setup.exe"), "setup.exe");
    assert_eq!(file_name("/bottles/games/drive_c/run.exe"), "run.exe");
    assert_eq!(file_name("plain.exe"), "plain.exe");
}
