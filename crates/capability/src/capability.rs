use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known capability identifiers.
pub mod known {
    pub const CAMERA: &str = "camera";
    pub const MICROPHONE: &str = "microphone";
    pub const CONTACTS: &str = "contacts";
    pub const CALENDAR: &str = "calendar";
    pub const SMS: &str = "sms";
    pub const PHONE: &str = "phone";
    pub const FINE_LOCATION: &str = "fine-location";
    pub const COARSE_LOCATION: &str = "coarse-location";
    pub const BACKGROUND_LOCATION: &str = "background-location";
    pub const POST_NOTIFICATIONS: &str = "post-notifications";
    pub const SYSTEM_ALERT_WINDOW: &str = "system-alert-window";
    pub const WRITE_SETTINGS: &str = "write-settings";
    pub const INSTALL_PACKAGES: &str = "install-packages";
    pub const MANAGE_EXTERNAL_STORAGE: &str = "manage-external-storage";
    pub const WRITE_EXTERNAL_STORAGE: &str = "write-external-storage";
}

/// An opaque identifier naming one OS capability.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable name used by the default UI providers.
    pub fn display_name(&self) -> String {
        let name = match self.0.as_str() {
            known::CAMERA => "Camera",
            known::MICROPHONE => "Microphone",
            known::CONTACTS => "Contacts",
            known::CALENDAR => "Calendar",
            known::SMS => "SMS",
            known::PHONE => "Phone",
            known::FINE_LOCATION | known::COARSE_LOCATION => "Location",
            known::BACKGROUND_LOCATION => "Background location",
            known::POST_NOTIFICATIONS => "Notifications",
            known::SYSTEM_ALERT_WINDOW => "Display over other apps",
            known::WRITE_SETTINGS => "Modify system settings",
            known::INSTALL_PACKAGES => "Install unknown apps",
            known::MANAGE_EXTERNAL_STORAGE | known::WRITE_EXTERNAL_STORAGE => "Storage",
            other => return other.replace(['-', '_'], " "),
        };
        name.to_string()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Capability {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Capability {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Capability {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<&str> for Capability {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Join capabilities into a comma-separated list for messages.
pub fn join(capabilities: &[Capability]) -> String {
    capabilities
        .iter()
        .map(Capability::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Platform version of the host, as an ordered integer level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiLevel(pub u32);

impl ApiLevel {
    /// First level where dangerous capabilities are granted by runtime prompt.
    pub const RUNTIME_PROMPTS: ApiLevel = ApiLevel(23);
    /// Per-application "install unknown apps" settings screen.
    pub const UNKNOWN_SOURCES: ApiLevel = ApiLevel(26);
    /// Background location split out of the foreground location grant.
    pub const BACKGROUND_LOCATION: ApiLevel = ApiLevel(29);
    /// All-files access settings screen.
    pub const ALL_FILES_ACCESS: ApiLevel = ApiLevel(30);
    /// Notifications become a runtime capability.
    pub const NOTIFICATIONS: ApiLevel = ApiLevel(33);

    pub fn supports_runtime_prompts(self) -> bool {
        self >= Self::RUNTIME_PROMPTS
    }
}

impl fmt::Display for ApiLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The grantedness of one capability for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityState {
    /// The host has granted the capability.
    Granted,
    /// Not granted; asking again is allowed.
    Denied,
    /// Not granted; only the settings screen can change that.
    PermanentlyDenied,
    /// The application never declared the capability.
    NotDeclared,
    /// Needs an out-of-band flow rather than the standard prompt.
    RequiresSpecialHandling,
}

impl fmt::Display for CapabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::PermanentlyDenied => "permanently denied",
            Self::NotDeclared => "not declared",
            Self::RequiresSpecialHandling => "requires special handling",
        };
        f.write_str(s)
    }
}

/// The outcome for one capability of a completed request.
///
/// Equality ignores the timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub capability: Capability,
    pub state: CapabilityState,
    pub requires_rationale: bool,
    pub timestamp: DateTime<Utc>,
}

impl CapabilityResult {
    pub fn new(capability: Capability, state: CapabilityState, requires_rationale: bool) -> Self {
        Self {
            capability,
            state,
            requires_rationale,
            timestamp: Utc::now(),
        }
    }

    pub fn granted(capability: Capability) -> Self {
        Self::new(capability, CapabilityState::Granted, false)
    }

    pub fn denied(capability: Capability, requires_rationale: bool) -> Self {
        Self::new(capability, CapabilityState::Denied, requires_rationale)
    }

    pub fn permanently_denied(capability: Capability) -> Self {
        Self::new(capability, CapabilityState::PermanentlyDenied, false)
    }

    pub fn not_declared(capability: Capability) -> Self {
        Self::new(capability, CapabilityState::NotDeclared, false)
    }

    pub fn special(capability: Capability) -> Self {
        Self::new(capability, CapabilityState::RequiresSpecialHandling, false)
    }

    /// Copy of this result with `requires_rationale` replaced.
    pub fn with_rationale(mut self, requires_rationale: bool) -> Self {
        self.requires_rationale = requires_rationale;
        self
    }

    pub fn is_granted(&self) -> bool {
        self.state == CapabilityState::Granted
    }

    pub fn is_denied(&self) -> bool {
        self.state == CapabilityState::Denied
    }

    pub fn is_permanently_denied(&self) -> bool {
        self.state == CapabilityState::PermanentlyDenied
    }
}

impl PartialEq for CapabilityResult {
    fn eq(&self, other: &Self) -> bool {
        self.capability == other.capability
            && self.state == other.state
            && self.requires_rationale == other.requires_rationale
    }
}

impl Eq for CapabilityResult {}
