use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use client_core::{
    ActivityLog, BottleBackend, EventBridge, HttpBackend, ReconciledApps, Refresh,
    SessionController, TaskState, ENGINE_SETUP_TASK, REPAIR_TASK,
};
use shared::domain::{Bottle, BottleId, GraphicsBackend, TaskKey};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(about = "Manage Wine bottles through the local bottle backend")]
struct Args {
    #[arg(long, default_value = "desktop.toml")]
    config: PathBuf,
    #[arg(long)]
    backend_url: Option<String>,
    #[arg(long)]
    log_filter: Option<String>,
    /// Do not open the push-event stream.
    #[arg(long)]
    no_events: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List bottles.
    Bottles,
    /// Show one bottle with its reconciled app library.
    Show { id: String },
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        template: Option<String>,
        #[arg(long)]
        runner: Option<PathBuf>,
    },
    Pin {
        id: String,
        exe: String,
        #[arg(long)]
        name: Option<String>,
    },
    Unpin { id: String, exe: String },
    Run { id: String, exe: String },
    Rename { id: String, name: String },
    Cover { id: String, cover: String },
    #[command(subcommand)]
    Engine(EngineCommand),
    Delete {
        id: String,
        #[arg(long)]
        yes: bool,
    },
    EngineStatus,
    DeployEngine,
    /// Reinstall the graphics runtime of a bottle.
    Repair { id: String },
    /// Show the graphics setup of a bottle, or switch it to d3dmetal, dxvk or wined3d.
    Graphics {
        id: String,
        backend: Option<GraphicsBackend>,
    },
    /// Reveal the bottle folder in the file manager.
    Open { id: String },
    /// Print push events until interrupted.
    Watch,
}

#[derive(Subcommand, Debug)]
enum EngineCommand {
    Set { id: String, path: PathBuf },
    Reset { id: String },
}

fn apply_args(settings: &mut Settings, args: &Args) {
    if let Some(url) = &args.backend_url {
        settings.backend_url = url.clone();
    }
    if let Some(filter) = &args.log_filter {
        settings.log_filter = filter.clone();
    }
    if args.no_events {
        settings.connect_events = false;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(&args.config)?;
    apply_args(&mut settings, &args);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    debug!(backend_url = %settings.backend_url, "settings loaded");

    let backend = HttpBackend::new(&settings.backend_url)?;
    let session = SessionController::new(backend.clone(), ActivityLog::new());
    if settings.connect_events {
        if let Err(err) = backend.connect_events().await {
            warn!(error = %err, "push events unavailable; task progress will not be shown");
        } else {
            EventBridge::new(Arc::clone(&session)).spawn(backend.subscribe_events());
        }
    }

    let result = run(args.command, &settings, &backend, &session).await;
    backend.disconnect_events().await;
    result
}

async fn run(
    command: Command,
    settings: &Settings,
    backend: &Arc<HttpBackend>,
    session: &Arc<SessionController>,
) -> Result<()> {
    match command {
        Command::Bottles => {
            for bottle in session.load_bottles().await? {
                print_bottle_row(&bottle);
            }
        }
        Command::Show { id } => {
            let refresh = open(session, &id).await?;
            report_refresh(&refresh);
            let snapshot = session.snapshot().await;
            if let Some(bottle) = &snapshot.detail {
                print_bottle_row(bottle);
                if let Some(cover) = &bottle.cover {
                    println!("  cover: {cover}");
                }
            }
            print_apps(&snapshot.apps);
        }
        Command::Create {
            name,
            template,
            runner,
        } => {
            let workflow = session.creation_workflow();
            let catalog = workflow.load_catalog().await;
            let request = catalog.request(name, template.as_deref(), runner.as_deref());
            if let Some(runner) = &request.runner {
                println!(
                    "Using {} ({}, {})",
                    runner.tier.label(),
                    runner.path.display(),
                    runner.version
                );
            }
            let mut status = workflow.subscribe_status();
            let printer = tokio::spawn(async move {
                while status.changed().await.is_ok() {
                    let message = status.borrow_and_update().message();
                    if !message.is_empty() {
                        println!("{message}");
                    }
                }
            });
            let result = session.create_bottle(&workflow, &request).await;
            drop(workflow);
            let _ = printer.await;
            let bottle = result?;
            println!("Created {} ({})", bottle.name, bottle.id);
        }
        Command::Pin { id, exe, name } => {
            open(session, &id).await?;
            session.pin_app(&exe, name.as_deref()).await?;
            print_apps(&session.snapshot().await.apps);
        }
        Command::Unpin { id, exe } => {
            open(session, &id).await?;
            session.unpin_app(&exe).await?;
            print_apps(&session.snapshot().await.apps);
        }
        Command::Run { id, exe } => {
            open(session, &id).await?;
            session.run_executable(&exe).await?;
        }
        Command::Rename { id, name } => {
            session.rename_bottle(&BottleId::from(id.as_str()), &name).await?;
        }
        Command::Cover { id, cover } => {
            session.set_cover(&BottleId::from(id.as_str()), &cover).await?;
        }
        Command::Engine(EngineCommand::Set { id, path }) => {
            session.set_engine(&BottleId::from(id.as_str()), &path).await?;
        }
        Command::Engine(EngineCommand::Reset { id }) => {
            session.reset_engine(&BottleId::from(id.as_str())).await?;
        }
        Command::Delete { id, yes } => {
            if !yes {
                bail!("refusing to delete bottle {id} without --yes");
            }
            session.delete_bottle(&BottleId::from(id.as_str())).await?;
        }
        Command::EngineStatus => {
            let ready = session.check_engine_readiness().await?;
            println!(
                "{}",
                if ready {
                    "Engine installed"
                } else {
                    "Engine missing; run deploy-engine"
                }
            );
        }
        Command::DeployEngine => {
            session.deploy_engine().await?;
            follow_task(session, settings, ENGINE_SETUP_TASK).await;
        }
        Command::Repair { id } => {
            open(session, &id).await?;
            session.repair_graphics().await?;
            follow_task(session, settings, REPAIR_TASK).await;
        }
        Command::Graphics { id, backend } => {
            open(session, &id).await?;
            let installed = match backend {
                Some(backend) => session.apply_graphics_backend(backend).await?,
                None => session.verify_graphics().await?,
            };
            println!(
                "D3DMetal libraries: {}",
                if installed { "installed" } else { "missing" }
            );
            if let Some(current) = session.snapshot().await.graphics_backend {
                println!("Backend: {}", current.label());
            }
        }
        Command::Open { id } => {
            session.open_bottle_dir(&BottleId::from(id.as_str())).await?;
        }
        Command::Watch => watch(backend.as_ref()).await?,
    }

    for line in session.activity().lines().await {
        eprintln!("{line}");
    }
    Ok(())
}

/// Loads the bottle list and selects `id`.
async fn open(session: &SessionController, id: &str) -> Result<Refresh> {
    let bottle_id = BottleId::from(id);
    let bottles = session.load_bottles().await?;
    if !bottles.iter().any(|bottle| bottle.id == bottle_id) {
        bail!("no bottle with id {id}");
    }
    Ok(session.select(bottle_id).await)
}

fn report_refresh(refresh: &Refresh) {
    if let Err(err) = &refresh.scan {
        eprintln!("scan incomplete: {err}");
    }
    if let Err(err) = &refresh.detail {
        eprintln!("details incomplete: {err}");
    }
}

fn print_bottle_row(bottle: &Bottle) {
    let engine = bottle
        .engine_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "default engine".to_string());
    println!(
        "{}\t{}\t{}\t{}",
        bottle.id,
        bottle.name,
        bottle.environment.as_str(),
        engine
    );
}

fn print_apps(apps: &ReconciledApps) {
    println!("Priority:");
    for app in &apps.priority {
        let marker = if app.pinned { "*" } else { " " };
        println!("  {marker} {}\t{}", app.name, app.exe_path);
    }
    println!("Other:");
    for app in &apps.secondary {
        println!("    {}\t{}", app.name, app.exe_path);
    }
}

/// Prints status changes of `key` until it settles or the wait runs out.
async fn follow_task(session: &SessionController, settings: &Settings, key: &str) {
    if !settings.connect_events {
        println!("Request sent; progress is not followed without push events.");
        return;
    }
    let key = TaskKey::from(key);
    let wait = Duration::from_secs(settings.event_wait_seconds);
    let follow = async {
        let mut last_status = String::new();
        loop {
            if let Some(task) = session.task(&key).await {
                if task.status != last_status {
                    println!("[{}] {}", task.title, task.status);
                    last_status = task.status.clone();
                }
                match task.state() {
                    TaskState::InProgress => {}
                    TaskState::Complete | TaskState::Failed => return,
                }
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    };
    if tokio::time::timeout(wait, follow).await.is_err() {
        println!("Still running after {}s; check again later.", wait.as_secs());
    }
}

async fn watch(backend: &HttpBackend) -> Result<()> {
    let mut events = backend.subscribe_events();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = events.recv() => match event {
                Ok(event) => println!("{}: {}", event.channel(), serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "watch lagged behind"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}
