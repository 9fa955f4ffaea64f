//! Capability error types.

use thiserror::Error;

use crate::{AppId, Capability, join};

/// Capability errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// One or more requested capabilities were never declared.
    ///
    /// This is a developer error: the only remedy is declaring them.
    #[error("capabilities not declared: {}", join(.missing))]
    NotDeclared { missing: Vec<Capability> },

    /// No declarations exist for the given application.
    #[error("no declarations for application '{0}'")]
    UnknownApplication(AppId),

    /// A settings navigation target was empty, a wildcard, or foreign.
    #[error("unscoped settings target: {0}")]
    UnscopedTarget(String),

    /// The host permission subsystem failed.
    #[error(transparent)]
    Host(#[from] HostError),

    /// Failed to parse a declaration file.
    #[error("failed to parse declarations: {0}")]
    Parse(String),

    /// An I/O error occurred while reading declarations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised by the host permission subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("transient host failure: {0}")]
    Transient(String),

    #[error("security exception: {0}")]
    Security(String),

    #[error("host unavailable: {0}")]
    Unavailable(String),

    #[error("settings navigation failed: {0}")]
    Navigation(String),
}

impl HostError {
    /// Transient and security-class failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HostError::Transient(_) | HostError::Security(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
