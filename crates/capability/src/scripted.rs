//! An in-memory host whose behavior is fixed by a [`HostState`].

use std::collections::{BTreeSet, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    ApiLevel, AppId, Capability, Host, HostAnswer, HostError, SettingsTarget, SurfaceId,
};

/// Grant state and prompt behavior of a [`ScriptedHost`].
///
/// ```toml
/// granted = ["camera"]
/// special_access = []
/// grant_on_prompt = ["microphone"]
/// deny_permanently = ["contacts"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostState {
    /// Capabilities whose standard grant is held.
    pub granted: BTreeSet<Capability>,

    /// Capabilities whose settings-screen toggle is on.
    pub special_access: BTreeSet<Capability>,

    /// Capabilities for which the host currently suggests a rationale.
    pub rationale: BTreeSet<Capability>,

    /// Capabilities the simulated user grants when prompted.
    pub grant_on_prompt: BTreeSet<Capability>,

    /// Capabilities the simulated user refuses with "don't ask again".
    pub deny_permanently: BTreeSet<Capability>,

    /// Number of upcoming prompts that fail with a transient error.
    pub failing_prompts: u32,
}

#[derive(Debug)]
struct Inner {
    reported_app: AppId,
    state: HostState,
    prompts: Vec<Vec<Capability>>,
    pending: VecDeque<(SurfaceId, Vec<Capability>)>,
    navigations: Vec<SettingsTarget>,
    queries: usize,
    unavailable: bool,
}

/// A [`Host`] backed by a mutable [`HostState`].
///
/// Records every prompt and navigation so callers can assert on them, and
/// produces answers for issued prompts through [`answer`](Self::answer).
#[derive(Debug)]
pub struct ScriptedHost {
    level: ApiLevel,
    inner: Mutex<Inner>,
}

impl ScriptedHost {
    pub fn new(app: AppId, level: ApiLevel, state: HostState) -> Self {
        Self {
            level,
            inner: Mutex::new(Inner {
                reported_app: app,
                state,
                prompts: Vec::new(),
                pending: VecDeque::new(),
                navigations: Vec::new(),
                queries: 0,
                unavailable: false,
            }),
        }
    }

    pub fn grant(&self, capability: &Capability) {
        self.inner.lock().state.granted.insert(capability.clone());
    }

    pub fn revoke(&self, capability: &Capability) {
        self.inner.lock().state.granted.remove(capability);
    }

    pub fn grant_special(&self, capability: &Capability) {
        self.inner
            .lock()
            .state
            .special_access
            .insert(capability.clone());
    }

    pub fn set_rationale(&self, capability: &Capability, show: bool) {
        let mut inner = self.inner.lock();
        if show {
            inner.state.rationale.insert(capability.clone());
        } else {
            inner.state.rationale.remove(capability);
        }
    }

    /// Change the identity reported by [`Host::app_id`].
    pub fn set_reported_app(&self, app: AppId) {
        self.inner.lock().reported_app = app;
    }

    /// Make the next `count` prompts fail with [`HostError::Transient`].
    pub fn fail_next_prompts(&self, count: u32) {
        self.inner.lock().state.failing_prompts = count;
    }

    /// Make every query fail with [`HostError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// Capability lists of every prompt issued so far, in order.
    pub fn prompts(&self) -> Vec<Vec<Capability>> {
        self.inner.lock().prompts.clone()
    }

    pub fn prompt_count(&self) -> usize {
        self.inner.lock().prompts.len()
    }

    /// Drain the prompts that have not been answered yet.
    pub fn take_pending(&self) -> Vec<(SurfaceId, Vec<Capability>)> {
        self.inner.lock().pending.drain(..).collect()
    }

    pub fn navigations(&self) -> Vec<SettingsTarget> {
        self.inner.lock().navigations.clone()
    }

    /// Number of grant and special-access queries answered.
    pub fn query_count(&self) -> usize {
        self.inner.lock().queries
    }

    pub fn state(&self) -> HostState {
        self.inner.lock().state.clone()
    }

    /// Simulate the user answering a prompt for `capabilities`.
    ///
    /// Grants listed in `grant_on_prompt` become held. A refusal leaves the
    /// host suggesting a rationale, unless the capability is listed in
    /// `deny_permanently`.
    pub fn answer(&self, capabilities: &[Capability]) -> HostAnswer {
        let mut inner = self.inner.lock();
        let state = &mut inner.state;
        capabilities
            .iter()
            .map(|capability| {
                let granted = state.grant_on_prompt.contains(capability)
                    || state.granted.contains(capability);
                if granted {
                    state.granted.insert(capability.clone());
                    state.rationale.remove(capability);
                } else if state.deny_permanently.contains(capability) {
                    state.rationale.remove(capability);
                } else {
                    state.rationale.insert(capability.clone());
                }
                (capability.clone(), granted)
            })
            .collect()
    }

    fn query(&self, read: impl FnOnce(&HostState) -> bool) -> Result<bool, HostError> {
        let mut inner = self.inner.lock();
        if inner.unavailable {
            return Err(HostError::Unavailable("scripted host offline".into()));
        }
        inner.queries += 1;
        Ok(read(&inner.state))
    }
}

impl Host for ScriptedHost {
    fn app_id(&self) -> Result<AppId, HostError> {
        let inner = self.inner.lock();
        if inner.unavailable {
            return Err(HostError::Unavailable("scripted host offline".into()));
        }
        Ok(inner.reported_app.clone())
    }

    fn platform_level(&self) -> ApiLevel {
        self.level
    }

    fn query_grant_state(&self, capability: &Capability) -> Result<bool, HostError> {
        self.query(|state| state.granted.contains(capability))
    }

    fn query_special_access(&self, capability: &Capability) -> Result<bool, HostError> {
        self.query(|state| state.special_access.contains(capability))
    }

    fn should_show_rationale(
        &self,
        _surface: &SurfaceId,
        capability: &Capability,
    ) -> Result<bool, HostError> {
        self.query(|state| state.rationale.contains(capability))
    }

    fn issue_prompt(
        &self,
        surface: &SurfaceId,
        capabilities: &[Capability],
    ) -> Result<(), HostError> {
        let mut inner = self.inner.lock();
        if inner.unavailable {
            return Err(HostError::Unavailable("scripted host offline".into()));
        }
        if inner.state.failing_prompts > 0 {
            inner.state.failing_prompts -= 1;
            return Err(HostError::Transient("prompt dispatch failed".into()));
        }
        debug!(surface = %surface, count = capabilities.len(), "scripted prompt");
        inner.prompts.push(capabilities.to_vec());
        inner
            .pending
            .push_back((surface.clone(), capabilities.to_vec()));
        Ok(())
    }

    fn navigate_to_scoped_settings(
        &self,
        _surface: &SurfaceId,
        target: &SettingsTarget,
    ) -> Result<(), HostError> {
        let mut inner = self.inner.lock();
        if !target.is_scoped_to(&inner.reported_app) {
            return Err(HostError::Navigation(format!(
                "{target} is not scoped to {}",
                inner.reported_app
            )));
        }
        inner.navigations.push(target.clone());
        Ok(())
    }
}
