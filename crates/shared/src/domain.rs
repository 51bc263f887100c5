use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(BottleId);
id_newtype!(TemplateId);
id_newtype!(TaskKey);

/// Template whose bottles get the "pro" environment and a bundled Steam install.
pub const STEAM_GAMING_TEMPLATE: &str = "steam_gaming";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    Pro,
    #[default]
    Classic,
}

impl EnvironmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pro => "pro",
            Self::Classic => "classic",
        }
    }
}

/// Engine tiers, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerTier {
    Baseline,
    Enhanced,
    VendorWrapped,
}

impl RunnerTier {
    pub fn label(self) -> &'static str {
        match self {
            Self::Baseline => "Standard Wine",
            Self::Enhanced => "Game Porting Toolkit",
            Self::VendorWrapped => "Whisky GPTK",
        }
    }
}

/// Direct3D translation layer a bottle renders through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphicsBackend {
    D3DMetal,
    #[serde(rename = "DXVK")]
    Dxvk,
    WineD3D,
}

impl GraphicsBackend {
    pub const ALL: [GraphicsBackend; 3] = [Self::D3DMetal, Self::Dxvk, Self::WineD3D];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::D3DMetal => "d3dmetal",
            Self::Dxvk => "dxvk",
            Self::WineD3D => "wined3d",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::D3DMetal => "D3DMetal (GPTK)",
            Self::Dxvk => "DXVK (Vulkan)",
            Self::WineD3D => "WineD3D (OpenGL)",
        }
    }

    /// Whether the bottle needs the D3DMetal libraries installed first.
    pub fn needs_metal_libraries(self) -> bool {
        self == Self::D3DMetal
    }

    /// Backend offered when nothing else is known about the bottle.
    pub fn preferred(metal_libraries_installed: bool) -> Self {
        if metal_libraries_installed {
            Self::D3DMetal
        } else {
            Self::Dxvk
        }
    }
}

impl fmt::Display for GraphicsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown graphics backend '{0}' (expected d3dmetal, dxvk or wined3d)")]
pub struct UnknownGraphicsBackend(pub String);

impl FromStr for GraphicsBackend {
    type Err = UnknownGraphicsBackend;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|backend| backend.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownGraphicsBackend(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredApp {
    pub exe_path: String,
    pub name: String,
    pub pinned: bool,
    #[serde(default)]
    pub priority: bool,
}

impl RegisteredApp {
    pub fn pinned(exe_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            exe_path: exe_path.into(),
            name: name.into(),
            pinned: true,
            priority: false,
        }
    }

    pub fn pinned_from_detected(app: &DetectedApp) -> Self {
        Self {
            exe_path: app.exe_path.clone(),
            name: app.name.clone(),
            pinned: true,
            priority: app.is_priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedApp {
    pub exe_path: String,
    pub name: String,
    pub is_priority: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottle {
    pub id: BottleId,
    pub name: String,
    pub path: PathBuf,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub environment: EnvironmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default)]
    pub app_registry: Vec<RegisteredApp>,
}

impl Bottle {
    pub fn registered_app(&self, exe_path: &str) -> Option<&RegisteredApp> {
        self.app_registry
            .iter()
            .find(|app| app.exe_path == exe_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WineRunner {
    pub tier: RunnerTier,
    pub path: PathBuf,
    pub version: String,
    pub supports_accelerated_graphics: bool,
    pub supports_sync_primitives: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleTemplate {
    pub id: TemplateId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub recommended_tier: Option<RunnerTier>,
}

impl BottleTemplate {
    pub fn environment_kind(&self) -> EnvironmentKind {
        if self.id.as_str() == STEAM_GAMING_TEMPLATE {
            EnvironmentKind::Pro
        } else {
            EnvironmentKind::Classic
        }
    }

    /// Software installed by the last creation step, if the template bundles any.
    pub fn bundled_software(&self) -> Option<&'static str> {
        (self.id.as_str() == STEAM_GAMING_TEMPLATE).then_some("Steam")
    }
}
