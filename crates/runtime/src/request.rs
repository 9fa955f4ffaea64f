//! Request descriptors and the builder that produces them.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use capability::{Capability, SurfaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::ui::{DialogProvider, Rationale, RationaleProvider};
use crate::{ConfigIssue, DenialBehavior, Error, GrantlyConfig, RequestCallback, Result};

/// A unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a request.
///
/// `Created → Validating → Checking → {Resolved | AwaitingHost} → Completed`,
/// with `Cancelled` reachable from any state before completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Created,
    Validating,
    Checking,
    AwaitingHost,
    Resolved,
    Cancelled,
    Completed,
}

impl RequestState {
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        match (self, next) {
            (Completed, _) => false,
            (Cancelled, Completed) => true,
            (Cancelled, _) => false,
            (_, Cancelled) => true,
            (Created, Validating)
            | (Validating, Checking)
            | (Checking, Resolved)
            | (Checking, AwaitingHost)
            | (AwaitingHost, Resolved)
            | (Resolved, Completed) => true,
            _ => false,
        }
    }

    /// Still owned by the registry and able to receive a host answer.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RequestState::Validating | RequestState::Checking | RequestState::AwaitingHost
        )
    }

    pub fn is_terminal(self) -> bool {
        self == RequestState::Completed
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Validating => "validating",
            Self::Checking => "checking",
            Self::AwaitingHost => "awaiting host",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// A submitted request.
///
/// Plain data: the capability set is copied in at creation and never
/// changes, and nothing refers back to the builder.
pub struct RequestDescriptor {
    pub id: RequestId,
    pub surface: SurfaceId,
    capabilities: Vec<Capability>,
    pub lazy: bool,
    pub rationale: Rationale,
    pub denial_behavior: DenialBehavior,
    pub continue_on_denied: bool,
    pub callback: Arc<dyn RequestCallback>,
    pub rationale_provider: Option<Arc<dyn RationaleProvider>>,
    pub dialog_provider: Option<Arc<dyn DialogProvider>>,
    pub created_at: DateTime<Utc>,
    started: Instant,
    state: RequestState,
}

impl RequestDescriptor {
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Move to `next`; returns false and stays put when the transition is
    /// not allowed.
    pub fn transition(&mut self, next: RequestState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("id", &self.id)
            .field("surface", &self.surface)
            .field("capabilities", &self.capabilities)
            .field("lazy", &self.lazy)
            .field("denial_behavior", &self.denial_behavior)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Builds a [`RequestDescriptor`]. Consumed by [`build`](Self::build).
pub struct RequestBuilder {
    surface: SurfaceId,
    capabilities: Vec<Capability>,
    lazy: bool,
    rationale: Rationale,
    denial_behavior: DenialBehavior,
    continue_on_denied: bool,
    callback: Option<Arc<dyn RequestCallback>>,
    rationale_provider: Option<Arc<dyn RationaleProvider>>,
    dialog_provider: Option<Arc<dyn DialogProvider>>,
}

impl RequestBuilder {
    /// Start a request from `surface` with defaults taken from `config`.
    pub fn new(surface: impl Into<SurfaceId>, config: &GrantlyConfig) -> Self {
        Self {
            surface: surface.into(),
            capabilities: Vec::new(),
            lazy: config.default_lazy,
            rationale: config.default_rationale(),
            denial_behavior: config.denial_behavior,
            continue_on_denied: true,
            callback: None,
            rationale_provider: None,
            dialog_provider: None,
        }
    }

    /// Replace the requested capabilities.
    pub fn capabilities<I, C>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_capabilities<I, C>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn rationale(mut self, title: impl Into<String>, message: impl Into<String>) -> Self {
        self.rationale = Rationale::new(title, message);
        self
    }

    /// Use `provider` instead of the engine's rationale provider.
    pub fn rationale_provider(mut self, provider: impl RationaleProvider + 'static) -> Self {
        self.rationale_provider = Some(Arc::new(provider));
        self
    }

    /// Use `provider` instead of the engine's dialog provider.
    pub fn dialog_provider(mut self, provider: impl DialogProvider + 'static) -> Self {
        self.dialog_provider = Some(Arc::new(provider));
        self
    }

    pub fn denial_behavior(mut self, behavior: DenialBehavior) -> Self {
        self.denial_behavior = behavior;
        self
    }

    /// When false, any refusal applies the denial behavior.
    pub fn continue_on_denied(mut self, continue_on_denied: bool) -> Self {
        self.continue_on_denied = continue_on_denied;
        self
    }

    pub fn callback(mut self, callback: impl RequestCallback + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Use a callback that is shared with the caller.
    pub fn shared_callback(mut self, callback: Arc<dyn RequestCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Produce the descriptor.
    ///
    /// Duplicate capabilities are collapsed, keeping the first occurrence.
    pub fn build(self) -> Result<RequestDescriptor> {
        if self.capabilities.is_empty() {
            return Err(Error::InvalidConfiguration(
                ConfigIssue::structural("capabilities", "no capabilities requested")
                    .with_fix("call capabilities() before build()"),
            ));
        }
        let Some(callback) = self.callback else {
            return Err(Error::InvalidConfiguration(
                ConfigIssue::structural("callback", "no callback set")
                    .with_fix("call callback() before build()"),
            ));
        };
        if self.rationale.title.trim().is_empty() || self.rationale.message.trim().is_empty() {
            return Err(Error::InvalidConfiguration(ConfigIssue::structural(
                "rationale",
                "rationale title and message cannot be empty",
            )));
        }

        let mut seen = HashSet::new();
        let capabilities = self
            .capabilities
            .into_iter()
            .filter(|c| seen.insert(c.clone()))
            .collect();

        Ok(RequestDescriptor {
            id: RequestId::new(),
            surface: self.surface,
            capabilities,
            lazy: self.lazy,
            rationale: self.rationale,
            denial_behavior: self.denial_behavior,
            continue_on_denied: self.continue_on_denied,
            callback,
            rationale_provider: self.rationale_provider,
            dialog_provider: self.dialog_provider,
            created_at: Utc::now(),
            started: Instant::now(),
            state: RequestState::Created,
        })
    }
}

/// What `submit` did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub id: RequestId,
    /// `Completed` when results were delivered immediately, otherwise
    /// `AwaitingHost`.
    pub state: RequestState,
    /// Capabilities the host was asked for.
    pub prompted: Vec<Capability>,
    /// Set when the prompt failed and a retry is scheduled.
    pub retry_after: Option<Duration>,
}

impl Submitted {
    pub fn is_completed(&self) -> bool {
        self.state == RequestState::Completed
    }
}
