use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{BottleId, EnvironmentKind, GraphicsBackend, RegisteredApp};

pub const STATUS_UPDATE_CHANNEL: &str = "status-update";
pub const ENGINE_STATUS_CHANNEL: &str = "engine-status";
pub const LIBRARY_CHANGED_CHANNEL: &str = "library-changed";

/// Events pushed by the backend outside of any request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum PushEvent {
    StatusUpdate(String),
    EngineStatus(String),
    LibraryChanged(BottleId),
}

impl PushEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            Self::StatusUpdate(_) => STATUS_UPDATE_CHANNEL,
            Self::EngineStatus(_) => ENGINE_STATUS_CHANNEL,
            Self::LibraryChanged(_) => LIBRARY_CHANGED_CHANNEL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBottleRequest {
    pub name: String,
    pub environment: EnvironmentKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameBottleRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetCoverRequest {
    pub cover: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetEngineRequest {
    pub engine_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinAppRequest {
    pub app: RegisteredApp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnpinAppQuery {
    pub exe_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExecutableRequest {
    pub path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineReadinessResponse {
    pub ready: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SetGraphicsBackendRequest {
    pub backend: GraphicsBackend,
}

/// Whether the D3DMetal libraries are present in a bottle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GraphicsLibrariesResponse {
    pub installed: bool,
}
