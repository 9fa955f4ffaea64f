//! Runtime error types.

use std::fmt;
use std::time::Duration;

use capability::{Capability, HostError, SurfaceId, join};
use thiserror::Error;

use crate::{Rejection, RequestId};

/// Runtime errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// One or more requested capabilities were never declared.
    ///
    /// Fatal and never retried.
    #[error("capabilities not declared: {}", join(.missing))]
    NotDeclared { missing: Vec<Capability> },

    /// Another request is already in flight for the same surface.
    #[error(
        "request {active} is already in flight for surface '{surface}' ({}ms old)",
        .age.as_millis()
    )]
    ConcurrentRequest {
        surface: SurfaceId,
        active: RequestId,
        age: Duration,
    },

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(ConfigIssue),

    /// A host call kept failing.
    #[error("host failed after {attempts} attempt(s): {source}")]
    TransientHost { attempts: u32, source: HostError },

    /// The isolation gate refused the request.
    #[error("request rejected: {0}")]
    Rejected(Rejection),

    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    /// The event loop is not running.
    #[error("engine stopped")]
    EngineStopped,

    #[error(transparent)]
    Capability(capability::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<capability::Error> for Error {
    fn from(e: capability::Error) -> Self {
        match e {
            capability::Error::NotDeclared { missing } => Error::NotDeclared { missing },
            other => Error::Capability(other),
        }
    }
}

impl From<HostError> for Error {
    fn from(source: HostError) -> Self {
        Error::TransientHost {
            attempts: 1,
            source,
        }
    }
}

impl Error {
    /// The host failure behind this error, if any.
    pub fn host_error(&self) -> Option<&HostError> {
        match self {
            Error::TransientHost { source, .. } => Some(source),
            Error::Capability(capability::Error::Host(e)) => Some(e),
            _ => None,
        }
    }
}

/// Whether a configuration problem can be repaired with defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// Presentation-only; the default is substituted.
    Cosmetic,
    /// The engine cannot run with this value.
    Structural,
}

/// A single configuration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub kind: IssueKind,
    /// Configuration key the issue concerns.
    pub field: String,
    pub issue: String,
    /// Suggested fix, if one is known.
    pub fix: Option<String>,
}

impl ConfigIssue {
    pub fn cosmetic(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            kind: IssueKind::Cosmetic,
            field: field.into(),
            issue: issue.into(),
            fix: None,
        }
    }

    pub fn structural(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            kind: IssueKind::Structural,
            field: field.into(),
            issue: issue.into(),
            fix: None,
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    pub fn is_cosmetic(&self) -> bool {
        self.kind == IssueKind::Cosmetic
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.issue)?;
        if let Some(fix) = &self.fix {
            write!(f, " ({fix})")?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_declared_is_lifted_from_capability_errors() {
        let err: Error = capability::Error::NotDeclared {
            missing: vec!["sms".into(), "phone".into()],
        }
        .into();
        assert!(matches!(err, Error::NotDeclared { ref missing } if missing.len() == 2));
        assert_eq!(err.to_string(), "capabilities not declared: sms, phone");
    }

    #[test]
    fn host_errors_are_exposed() {
        let err: Error = capability::Error::Host(HostError::Security("denied".into())).into();
        assert_eq!(err.host_error(), Some(&HostError::Security("denied".into())));
        assert!(Error::EngineStopped.host_error().is_none());
    }

    #[test]
    fn config_issue_display_includes_fix() {
        let issue = ConfigIssue::cosmetic("dialog_theme", "unknown theme 'neon'")
            .with_fix("use one of: default, light, dark, system");
        assert_eq!(
            issue.to_string(),
            "dialog_theme: unknown theme 'neon' (use one of: default, light, dark, system)"
        );
    }
}
