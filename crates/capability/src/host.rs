//! Host permission subsystem interface.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ApiLevel, Capability, HostError, SettingsTarget};

/// The identity of the application requesting capabilities.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque handle to the UI context issuing a request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(String);

impl SurfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SurfaceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SurfaceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The host's asynchronous answer to a prompt: one grant bit per capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAnswer {
    pub grants: Vec<(Capability, bool)>,
}

impl HostAnswer {
    pub fn new(grants: Vec<(Capability, bool)>) -> Self {
        Self { grants }
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.grants.iter().map(|(capability, _)| capability)
    }

    pub fn is_granted(&self, capability: &Capability) -> Option<bool> {
        self.grants
            .iter()
            .find(|(c, _)| c == capability)
            .map(|(_, granted)| *granted)
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl FromIterator<(Capability, bool)> for HostAnswer {
    fn from_iter<I: IntoIterator<Item = (Capability, bool)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Trait for the host permission subsystem.
///
/// Implementations answer grant queries and accept prompts; the answer to a
/// prompt arrives later as a [`HostAnswer`] delivered back to the engine.
/// This is the boundary between orchestration and the operating system.
pub trait Host: Send + Sync {
    /// The identity the host reports for the running application.
    fn app_id(&self) -> Result<AppId, HostError>;

    /// The platform version of the running host.
    fn platform_level(&self) -> ApiLevel;

    /// Whether the standard grant for `capability` is currently held.
    fn query_grant_state(&self, capability: &Capability) -> Result<bool, HostError>;

    /// Whether an out-of-band grant (settings-screen toggle) is currently held.
    fn query_special_access(&self, capability: &Capability) -> Result<bool, HostError>;

    /// Whether an explanatory prompt should precede another request.
    fn should_show_rationale(
        &self,
        surface: &SurfaceId,
        capability: &Capability,
    ) -> Result<bool, HostError>;

    /// Show the standard runtime prompt for `capabilities` on `surface`.
    fn issue_prompt(&self, surface: &SurfaceId, capabilities: &[Capability])
    -> Result<(), HostError>;

    /// Open a settings screen scoped to the application named by `target`.
    fn navigate_to_scoped_settings(
        &self,
        surface: &SurfaceId,
        target: &SettingsTarget,
    ) -> Result<(), HostError>;
}
