//! Special-capability routing.
//!
//! Some capabilities cannot be granted through the standard runtime prompt:
//! they need a settings screen, a prerequisite grant, or they only became
//! runtime capabilities at a given platform level. The router knows which
//! flow applies and, for settings flows, performs the navigation.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{ApiLevel, AppId, Capability, Error, Host, HostError, Result, SurfaceId, known};

/// How a special capability is granted from its `since` level onward.
#[derive(Debug, Clone, Copy)]
enum Flow {
    /// A settings screen scoped to the application.
    Settings { action: &'static str },
    /// A standard prompt that requires one of `any_of` to be granted first.
    Prerequisite { any_of: &'static [&'static str] },
    /// A standard prompt with version-gated semantics.
    StandardPrompt,
}

/// What applies below the `since` level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Legacy {
    /// Granted at install time.
    InstallTime,
    /// Handled as the standard flow of another capability.
    Fallback(&'static str),
    /// An ordinary capability.
    NotSpecial,
}

struct SpecialEntry {
    capability: &'static str,
    since: ApiLevel,
    flow: Flow,
    below: Legacy,
}

const SPECIAL: &[SpecialEntry] = &[
    SpecialEntry {
        capability: known::SYSTEM_ALERT_WINDOW,
        since: ApiLevel::RUNTIME_PROMPTS,
        flow: Flow::Settings { action: "manage-overlay-permission" },
        below: Legacy::InstallTime,
    },
    SpecialEntry {
        capability: known::WRITE_SETTINGS,
        since: ApiLevel::RUNTIME_PROMPTS,
        flow: Flow::Settings { action: "manage-write-settings" },
        below: Legacy::InstallTime,
    },
    SpecialEntry {
        capability: known::INSTALL_PACKAGES,
        since: ApiLevel::UNKNOWN_SOURCES,
        flow: Flow::Settings { action: "manage-unknown-app-sources" },
        below: Legacy::InstallTime,
    },
    SpecialEntry {
        capability: known::MANAGE_EXTERNAL_STORAGE,
        since: ApiLevel::ALL_FILES_ACCESS,
        flow: Flow::Settings { action: "manage-app-all-files-access" },
        below: Legacy::Fallback(known::WRITE_EXTERNAL_STORAGE),
    },
    SpecialEntry {
        capability: known::BACKGROUND_LOCATION,
        since: ApiLevel::BACKGROUND_LOCATION,
        flow: Flow::Prerequisite {
            any_of: &[known::FINE_LOCATION, known::COARSE_LOCATION],
        },
        below: Legacy::NotSpecial,
    },
    SpecialEntry {
        capability: known::POST_NOTIFICATIONS,
        since: ApiLevel::NOTIFICATIONS,
        flow: Flow::StandardPrompt,
        below: Legacy::NotSpecial,
    },
];

fn entry(capability: &Capability) -> Option<&'static SpecialEntry> {
    SPECIAL.iter().find(|e| capability == &e.capability)
}

/// A settings screen scoped to exactly one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsTarget {
    action: String,
    package: AppId,
}

impl SettingsTarget {
    /// Action naming the application's own detail screen.
    pub const APP_DETAILS: &'static str = "application-details-settings";

    /// Build a target for `action` scoped to `app`.
    ///
    /// Fails when the package is empty or looks like a wildcard.
    pub fn scoped(action: impl Into<String>, app: &AppId) -> Result<Self> {
        let action = action.into();
        let package = app.as_str().trim();
        if action.trim().is_empty() {
            return Err(Error::UnscopedTarget("empty settings action".into()));
        }
        if package.is_empty() {
            return Err(Error::UnscopedTarget(format!("{action}: empty package")));
        }
        if package.contains(['*', '?', ' ']) || package == "all" {
            return Err(Error::UnscopedTarget(format!(
                "{action}: wildcard package '{package}'"
            )));
        }
        Ok(Self {
            action,
            package: app.clone(),
        })
    }

    /// The application's own detail screen.
    pub fn app_details(app: &AppId) -> Result<Self> {
        Self::scoped(Self::APP_DETAILS, app)
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn package(&self) -> &AppId {
        &self.package
    }

    pub fn is_scoped_to(&self, app: &AppId) -> bool {
        &self.package == app
    }

    /// Data URI identifying the scoped package.
    pub fn uri(&self) -> String {
        format!("package:{}", self.package)
    }
}

impl fmt::Display for SettingsTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.action, self.uri())
    }
}

/// What routing a special capability resulted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingOutcome {
    /// The host navigated to a settings screen scoped to the application.
    NavigatedToSettings(SettingsTarget),
    /// A standard prompt is needed for these capabilities; the orchestrator
    /// issues it so the request stays tracked.
    IssuedStandardPrompt(Vec<Capability>),
    /// Nothing to do.
    AlreadyGranted,
}

/// Maps special capabilities to the flow that grants them.
pub struct SpecialRouter {
    app: AppId,
    host: Arc<dyn Host>,
}

impl SpecialRouter {
    pub fn new(app: AppId, host: Arc<dyn Host>) -> Self {
        Self { app, host }
    }

    /// Whether `capability` is special on the running platform.
    pub fn is_special(&self, capability: &Capability) -> bool {
        Self::is_special_at(capability, self.host.platform_level())
    }

    /// Whether `capability` is special at platform `level`.
    pub fn is_special_at(capability: &Capability, level: ApiLevel) -> bool {
        match entry(capability) {
            Some(e) => level >= e.since || e.below != Legacy::NotSpecial,
            None => false,
        }
    }

    /// The settings target for a settings-flow capability, if it has one at
    /// the running level.
    pub fn settings_target(&self, capability: &Capability) -> Option<Result<SettingsTarget>> {
        let e = entry(capability)?;
        if self.host.platform_level() < e.since {
            return None;
        }
        match e.flow {
            Flow::Settings { action } => Some(SettingsTarget::scoped(action, &self.app)),
            _ => None,
        }
    }

    /// Probe the grant of a special capability.
    ///
    /// Settings flows use the host's special-access query; everything else
    /// uses the standard grant query, on the legacy fallback where one
    /// applies.
    pub fn probe(&self, capability: &Capability) -> Result<bool> {
        let Some(e) = entry(capability) else {
            return Ok(self.host.query_grant_state(capability)?);
        };

        if self.host.platform_level() < e.since {
            return Ok(match e.below {
                Legacy::InstallTime => true,
                Legacy::Fallback(other) => self.host.query_grant_state(&other.into())?,
                Legacy::NotSpecial => self.host.query_grant_state(capability)?,
            });
        }

        Ok(match e.flow {
            Flow::Settings { .. } => self.host.query_special_access(capability)?,
            Flow::Prerequisite { .. } | Flow::StandardPrompt => {
                self.host.query_grant_state(capability)?
            }
        })
    }

    /// Decide and start the flow that grants `capability`.
    pub fn route(&self, capability: &Capability, surface: &SurfaceId) -> Result<RoutingOutcome> {
        let level = self.host.platform_level();
        let Some(e) = entry(capability) else {
            return self.standard(capability);
        };

        if level < e.since {
            return match e.below {
                Legacy::InstallTime => {
                    debug!(capability = %capability, %level, "granted at install time");
                    Ok(RoutingOutcome::AlreadyGranted)
                }
                Legacy::Fallback(other) => self.standard(&other.into()),
                Legacy::NotSpecial => self.standard(capability),
            };
        }

        match e.flow {
            Flow::Settings { action } => {
                if self.host.query_special_access(capability)? {
                    return Ok(RoutingOutcome::AlreadyGranted);
                }
                let target = SettingsTarget::scoped(action, &self.app)?;
                self.navigate(surface, &target)?;
                Ok(RoutingOutcome::NavigatedToSettings(target))
            }
            Flow::Prerequisite { any_of } => {
                if self.host.query_grant_state(capability)? {
                    return Ok(RoutingOutcome::AlreadyGranted);
                }
                let mut satisfied = false;
                for prerequisite in any_of {
                    if self.host.query_grant_state(&(*prerequisite).into())? {
                        satisfied = true;
                        break;
                    }
                }
                if satisfied {
                    debug!(capability = %capability, "prerequisite held, prompting directly");
                    Ok(RoutingOutcome::IssuedStandardPrompt(vec![capability.clone()]))
                } else {
                    info!(
                        capability = %capability,
                        prerequisite = any_of[0],
                        "prerequisite missing, prompting for it first"
                    );
                    Ok(RoutingOutcome::IssuedStandardPrompt(vec![any_of[0].into()]))
                }
            }
            Flow::StandardPrompt => self.standard(capability),
        }
    }

    /// Navigate to `target` after re-checking it against the host's own
    /// identity.
    pub fn navigate(&self, surface: &SurfaceId, target: &SettingsTarget) -> Result<()> {
        let own = self.host.app_id()?;
        if !target.is_scoped_to(&own) || !target.is_scoped_to(&self.app) {
            warn!(target = %target, own = %own, "refusing settings navigation outside own application");
            return Err(Error::UnscopedTarget(format!(
                "{target} is not scoped to {own}"
            )));
        }
        info!(surface = %surface, target = %target, "navigating to scoped settings");
        self.host
            .navigate_to_scoped_settings(surface, target)
            .map_err(|e| match e {
                HostError::Navigation(_) => Error::Host(e),
                other => Error::Host(HostError::Navigation(other.to_string())),
            })
    }

    fn standard(&self, capability: &Capability) -> Result<RoutingOutcome> {
        if self.host.query_grant_state(capability)? {
            Ok(RoutingOutcome::AlreadyGranted)
        } else {
            Ok(RoutingOutcome::IssuedStandardPrompt(vec![capability.clone()]))
        }
    }
}
