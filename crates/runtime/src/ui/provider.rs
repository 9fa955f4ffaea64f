//! UI provider traits.

use capability::{Capability, SurfaceId};
use serde::{Deserialize, Serialize};

/// The user's answer to the permanent-denial dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogChoice {
    /// Open the application's own settings screen.
    OpenSettings,
    Dismiss,
}

/// Text shown before asking again for a denied capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rationale {
    pub title: String,
    pub message: String,
}

impl Rationale {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Trait for the dialog shown after a permanent denial.
pub trait DialogProvider: Send + Sync {
    fn show(&self, surface: &SurfaceId, capabilities: &[Capability]) -> DialogChoice;
}

/// Trait for the explanatory prompt shown before re-asking.
pub trait RationaleProvider: Send + Sync {
    /// Returns whether the user agreed to be asked again.
    fn show(&self, surface: &SurfaceId, capabilities: &[Capability], rationale: &Rationale)
    -> bool;
}

/// Trait for short, non-blocking notices.
pub trait ToastProvider: Send + Sync {
    fn granted(&self, surface: &SurfaceId, capabilities: &[Capability]);

    fn denied(&self, surface: &SurfaceId, capabilities: &[Capability]);

    fn permanently_denied(&self, surface: &SurfaceId, capabilities: &[Capability]);

    fn notice(&self, surface: &SurfaceId, message: &str);
}
