//! Bottle creation: provision, bind engine, first boot, template software.
//!
//! Steps run strictly in order and stop at the first rejection. Nothing that
//! already succeeded is undone; a half-built bottle stays listed until the user
//! deletes it.

use std::{fmt, future::Future, path::Path, sync::Arc};

use shared::domain::{Bottle, BottleId, BottleTemplate, RunnerTier, WineRunner};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    activity_log::ActivityLog,
    error::{PreconditionError, WorkflowError},
    BottleBackend,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreationStep {
    Provision,
    EngineAssignment,
    Initialization,
    TemplateMaterialization,
}

impl CreationStep {
    pub fn number(self) -> u8 {
        match self {
            Self::Provision => 1,
            Self::EngineAssignment => 2,
            Self::Initialization => 3,
            Self::TemplateMaterialization => 4,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::EngineAssignment => "engine assignment",
            Self::Initialization => "initialization",
            Self::TemplateMaterialization => "template materialization",
        }
    }
}

impl fmt::Display for CreationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.number(), self.label())
    }
}

/// What the creation screen shows while the workflow runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CreationStatus {
    #[default]
    Idle,
    Running {
        step: CreationStep,
        message: String,
    },
    Complete(BottleId),
    Failed {
        step: CreationStep,
        message: String,
    },
}

impl CreationStatus {
    pub fn message(&self) -> String {
        match self {
            Self::Idle => String::new(),
            Self::Running { message, .. } => message.clone(),
            Self::Complete(_) => "Complete!".to_string(),
            Self::Failed { message, .. } => format!("Error: {message}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreationRequest {
    pub name: String,
    pub runner: Option<WineRunner>,
    pub template: Option<BottleTemplate>,
}

impl CreationRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_runner(mut self, runner: WineRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_template(mut self, template: BottleTemplate) -> Self {
        self.template = Some(template);
        self
    }

    fn validate(&self) -> Result<(&str, &WineRunner, &BottleTemplate), PreconditionError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(PreconditionError::MissingName);
        }
        let runner = self.runner.as_ref().ok_or(PreconditionError::MissingRunner)?;
        let template = self
            .template
            .as_ref()
            .ok_or(PreconditionError::MissingTemplate)?;
        Ok((name, runner, template))
    }
}

/// Templates and runner candidates fetched for one creation attempt.
#[derive(Debug, Clone, Default)]
pub struct WizardCatalog {
    pub templates: Vec<BottleTemplate>,
    pub runners: Vec<WineRunner>,
}

impl WizardCatalog {
    pub fn default_template(&self) -> Option<&BottleTemplate> {
        self.templates.first()
    }

    pub fn template(&self, id: &str) -> Option<&BottleTemplate> {
        self.templates.iter().find(|template| template.id.as_str() == id)
    }

    pub fn runner(&self, path: &Path) -> Option<&WineRunner> {
        self.runners.iter().find(|runner| runner.path == path)
    }

    /// Recommended tier of the template first, then Enhanced, then
    /// VendorWrapped, then whatever was detected first.
    pub fn preferred_runner(&self, template: Option<&BottleTemplate>) -> Option<&WineRunner> {
        let by_tier = |tier: RunnerTier| self.runners.iter().find(|runner| runner.tier == tier);
        template
            .and_then(|template| template.recommended_tier)
            .and_then(by_tier)
            .or_else(|| by_tier(RunnerTier::Enhanced))
            .or_else(|| by_tier(RunnerTier::VendorWrapped))
            .or_else(|| self.runners.first())
    }

    /// Builds a request, falling back to the catalog defaults for anything not given.
    pub fn request(
        &self,
        name: impl Into<String>,
        template_id: Option<&str>,
        runner_path: Option<&Path>,
    ) -> CreationRequest {
        let template = match template_id {
            Some(id) => self.template(id),
            None => self.default_template(),
        };
        let runner = match runner_path {
            Some(path) => self.runner(path),
            None => self.preferred_runner(template),
        };
        CreationRequest {
            name: name.into(),
            runner: runner.cloned(),
            template: template.cloned(),
        }
    }
}

pub struct BottleCreationWorkflow {
    backend: Arc<dyn BottleBackend>,
    activity: ActivityLog,
    status: watch::Sender<CreationStatus>,
}

impl BottleCreationWorkflow {
    pub fn new(backend: Arc<dyn BottleBackend>, activity: ActivityLog) -> Self {
        let (status, _) = watch::channel(CreationStatus::Idle);
        Self {
            backend,
            activity,
            status,
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CreationStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> CreationStatus {
        self.status.borrow().clone()
    }

    pub async fn load_catalog(&self) -> WizardCatalog {
        let (templates, runners) = tokio::join!(
            self.backend.list_templates(),
            self.backend.list_runner_candidates()
        );
        let templates = match templates {
            Ok(templates) => templates,
            Err(err) => {
                self.activity
                    .record(format!("Error loading templates: {err:#}"))
                    .await;
                Vec::new()
            }
        };
        let runners = match runners {
            Ok(runners) => runners,
            Err(err) => {
                self.activity
                    .record(format!("Error detecting runners: {err:#}"))
                    .await;
                Vec::new()
            }
        };
        debug!(
            templates = templates.len(),
            runners = runners.len(),
            "creation catalog loaded"
        );
        WizardCatalog { templates, runners }
    }

    /// Runs all steps for `request`.
    ///
    /// Missing inputs are rejected before the backend is contacted. On a step
    /// failure the error names the step and any bottle already provisioned.
    pub async fn run(&self, request: &CreationRequest) -> Result<Bottle, WorkflowError> {
        let (name, runner, template) = match request.validate() {
            Ok(inputs) => inputs,
            Err(err) => {
                warn!(error = %err, "bottle creation rejected before start");
                return Err(err.into());
            }
        };

        let bottle = self
            .run_step(
                CreationStep::Provision,
                "Initializing bottle...".to_string(),
                None,
                self.backend
                    .create_bottle(name, template.environment_kind()),
            )
            .await?;
        info!(bottle_id = %bottle.id, template = %template.id, "bottle provisioned");

        self.run_step(
            CreationStep::EngineAssignment,
            "Setting up engine...".to_string(),
            Some(&bottle.id),
            self.backend.set_bottle_engine(&bottle.id, &runner.path),
        )
        .await?;

        self.run_step(
            CreationStep::Initialization,
            "Booting runtime...".to_string(),
            Some(&bottle.id),
            self.backend.initialize_bottle_runtime(&bottle.id),
        )
        .await?;

        match template.bundled_software() {
            Some(software) => {
                self.run_step(
                    CreationStep::TemplateMaterialization,
                    format!("Downloading & installing {software}..."),
                    Some(&bottle.id),
                    self.backend.install_template_dependency(&bottle.id),
                )
                .await?;
            }
            None => debug!(template = %template.id, "template bundles no software"),
        }

        self.status
            .send_replace(CreationStatus::Complete(bottle.id.clone()));
        self.activity
            .record(format!("Created bottle {}", bottle.name))
            .await;
        Ok(bottle)
    }

    async fn run_step<T, F>(
        &self,
        step: CreationStep,
        message: String,
        bottle_id: Option<&BottleId>,
        call: F,
    ) -> Result<T, WorkflowError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        debug!(%step, "creation step started");
        self.status
            .send_replace(CreationStatus::Running { step, message });
        match call.await {
            Ok(value) => Ok(value),
            Err(err) => {
                let message = format!("{err:#}");
                warn!(%step, error = %message, "creation step failed");
                self.status.send_replace(CreationStatus::Failed {
                    step,
                    message: message.clone(),
                });
                self.activity
                    .record(format!("Error creating bottle at {step}: {message}"))
                    .await;
                Err(WorkflowError::StepFailed {
                    step,
                    bottle_id: bottle_id.cloned(),
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod tests;
