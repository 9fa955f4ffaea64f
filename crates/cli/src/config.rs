//! Application profiles loaded from TOML.
//!
//! ```toml
//! [app]
//! id = "dev.grantly.demo"
//! platform_level = 34
//! declared = ["camera", "microphone", "fine-location"]
//!
//! [host]
//! granted = ["camera"]
//! grant_on_prompt = ["microphone"]
//!
//! [grantly]
//! show_toasts = true
//! ```

use std::path::Path;

use capability::{ApiLevel, AppId, Capability, HostState, Manifest, ScriptedHost};
use runtime::GrantlyConfig;
use serde::Deserialize;

/// Top-level profile.
#[derive(Debug, Deserialize)]
pub struct Profile {
    /// The application and its declarations.
    pub app: AppConfig,

    /// Scripted host state and simulated user answers.
    #[serde(default)]
    pub host: HostState,

    /// Engine configuration.
    #[serde(default)]
    pub grantly: GrantlyConfig,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub id: AppId,

    #[serde(default = "default_platform_level")]
    pub platform_level: u32,

    #[serde(default)]
    pub declared: Vec<Capability>,
}

fn default_platform_level() -> u32 {
    34
}

impl Profile {
    /// Load a profile from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a profile from a TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let profile: Profile = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if profile.app.id.as_str().trim().is_empty() {
            return Err(ConfigError::MissingAppId);
        }
        Ok(profile)
    }

    pub fn manifest(&self) -> Manifest {
        Manifest::new(self.app.id.clone(), self.app.declared.iter().cloned())
    }

    /// A scripted host seeded with this profile's state.
    pub fn host(&self) -> ScriptedHost {
        ScriptedHost::new(
            self.app.id.clone(),
            ApiLevel(self.app.platform_level),
            self.host.clone(),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("profile not found: {0}")]
    NotFound(String),

    #[error("failed to read profile: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse profile: {0}")]
    Parse(String),

    #[error("profile has no application id: set app.id")]
    MissingAppId,
}
