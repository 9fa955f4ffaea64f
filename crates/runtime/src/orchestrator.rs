//! The request orchestrator.
//!
//! Composes declaration validation, state checking, special routing, the
//! isolation gate and recovery into one state machine, and owns the registry
//! of in-flight requests. It is the only component that issues host prompts
//! and consumes host answers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use capability::{
    AppId, Capability, CapabilityResult, CapabilityState, DeclarationValidator, Host, HostAnswer,
    RoutingOutcome, SettingsTarget, SpecialRouter, StateChecker, SurfaceId, join,
};
use tracing::{debug, error, info, warn};

use crate::callback::ResultGroups;
use crate::journal::JournalKind;
use crate::ui::{DialogChoice, UiProviders};
use crate::{
    Degradation, Error, GrantlyConfig, IsolationGate, Journal, PromptHistory, Recovery,
    RecoveryManager, Rejection, RequestDescriptor, RequestId, RequestState, Result, Submitted,
};

/// A request waiting for the host.
struct Pending {
    descriptor: RequestDescriptor,
    /// What the host is asked for; may include substituted prerequisites.
    prompt: Vec<Capability>,
    /// Results settled while checking.
    settled: Vec<CapabilityResult>,
    /// Whether the host accepted the prompt.
    dispatched: bool,
}

impl Pending {
    /// Whether every answered capability belongs to this request.
    fn accepts(&self, answer: &HostAnswer) -> bool {
        !answer.is_empty()
            && answer.capabilities().all(|c| {
                self.descriptor.capabilities().contains(c) || self.prompt.contains(c)
            })
    }
}

/// The outcome of checking every requested capability.
#[derive(Debug, Default)]
struct Plan {
    settled: Vec<CapabilityResult>,
    prompt: Vec<Capability>,
    /// Settings screens to open once the request is admitted.
    navigate: Vec<(Capability, SettingsTarget)>,
}

impl Plan {
    fn prompt_for(&mut self, capability: Capability) {
        if !self.prompt.contains(&capability) {
            self.prompt.push(capability);
        }
    }
}

pub struct Orchestrator {
    app: AppId,
    config: GrantlyConfig,
    host: Arc<dyn Host>,
    declarations: Arc<DeclarationValidator>,
    checker: Arc<StateChecker>,
    router: Arc<SpecialRouter>,
    gate: Arc<IsolationGate>,
    recovery: RecoveryManager,
    ui: UiProviders,
    journal: Arc<Journal>,
    history: PromptHistory,
    registry: HashMap<RequestId, Pending>,
}

impl Orchestrator {
    pub fn new(
        app: AppId,
        config: GrantlyConfig,
        host: Arc<dyn Host>,
        declarations: Arc<DeclarationValidator>,
        ui: UiProviders,
    ) -> Self {
        let router = Arc::new(SpecialRouter::new(app.clone(), host.clone()));
        let checker = Arc::new(StateChecker::new(
            host.clone(),
            declarations.clone(),
            router.clone(),
        ));
        let gate = Arc::new(IsolationGate::new(
            app.clone(),
            config.gate.clone(),
            host.clone(),
            declarations.clone(),
        ));
        let recovery = RecoveryManager::new(config.recovery.clone());
        Self {
            app,
            config,
            host,
            declarations,
            checker,
            router,
            gate,
            recovery,
            ui,
            journal: Arc::new(Journal::default()),
            history: PromptHistory::new(),
            registry: HashMap::new(),
        }
    }

    pub fn config(&self) -> &GrantlyConfig {
        &self.config
    }

    pub fn checker(&self) -> &Arc<StateChecker> {
        &self.checker
    }

    pub fn gate(&self) -> &Arc<IsolationGate> {
        &self.gate
    }

    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    pub fn history(&self) -> &PromptHistory {
        &self.history
    }

    /// Run a request until it is resolved or waiting on the host.
    ///
    /// Validation, routing and admission failures are returned here, before
    /// any prompt or settings navigation. Failures after that are reported to the callback.
    pub fn submit(&mut self, mut descriptor: RequestDescriptor) -> Result<Submitted> {
        let id = descriptor.id;
        let surface = descriptor.surface.clone();
        info!(
            request_id = %id,
            surface = %surface,
            capabilities = %join(descriptor.capabilities()),
            lazy = descriptor.lazy,
            "request submitted"
        );
        self.journal.record(
            Some(id),
            JournalKind::Submitted {
                surface: surface.clone(),
                capabilities: descriptor.capabilities().to_vec(),
                lazy: descriptor.lazy,
            },
        );

        advance(&mut descriptor, RequestState::Validating);
        if let Err(e) = self.declarations.validate(descriptor.capabilities()) {
            let error = self.reject(id, e.into());
            self.deny_undeclared(&descriptor, &error);
            return Err(error);
        }

        advance(&mut descriptor, RequestState::Checking);
        let Plan {
            mut settled,
            mut prompt,
            navigate,
        } = match self.plan(&descriptor) {
            Ok(plan) => plan,
            Err(e) => return Err(self.reject(id, e)),
        };

        if prompt.is_empty() && navigate.is_empty() {
            return Ok(self.resolve_now(descriptor, settled));
        }

        if let Some(active) = self.active_request_for(&surface) {
            let age = self
                .registry
                .get(&active)
                .map(|p| p.descriptor.age())
                .unwrap_or_default();
            let conflict = Error::ConcurrentRequest {
                surface: surface.clone(),
                active,
                age,
            };
            match self.recovery.handle(&conflict, descriptor.denial_behavior) {
                Recovery::ReclaimStale(stale) => {
                    self.expire(stale);
                }
                _ => return Err(self.reject(id, conflict)),
            }
        }

        let admitted: Vec<Capability> = prompt
            .iter()
            .chain(navigate.iter().map(|(c, _)| c))
            .cloned()
            .collect();
        if let Err(rejection) = self.gate.check(&admitted) {
            return Err(self.reject(id, Error::Rejected(rejection)));
        }

        if let Err(e) = self.open_scoped_settings(&surface, navigate) {
            return Err(self.reject(id, e));
        }
        if prompt.is_empty() {
            return Ok(self.resolve_now(descriptor, settled));
        }

        if !descriptor.lazy && self.config.show_rationale {
            let needing: Vec<Capability> = prompt
                .iter()
                .filter(|c| self.requires_rationale(&surface, c))
                .cloned()
                .collect();
            if !needing.is_empty() {
                let provider = descriptor
                    .rationale_provider
                    .clone()
                    .unwrap_or_else(|| self.ui.rationale.clone());
                if !provider.show(&surface, &needing, &descriptor.rationale) {
                    info!(request_id = %id, capabilities = %join(&needing), "rationale declined");
                    prompt.retain(|c| !needing.contains(c));
                    settled.extend(
                        needing
                            .into_iter()
                            .map(|c| CapabilityResult::denied(c, true)),
                    );
                    if prompt.is_empty() {
                        return Ok(self.resolve_now(descriptor, settled));
                    }
                }
            }
        }

        Ok(self.dispatch(descriptor, prompt, settled))
    }

    /// Partition the requested capabilities into settled results and the
    /// capabilities to prompt for.
    fn plan(&self, descriptor: &RequestDescriptor) -> Result<Plan> {
        let surface = &descriptor.surface;
        let mut plan = Plan::default();

        for capability in descriptor.capabilities() {
            if !self.router.is_special(capability) {
                self.plan_standard(surface, capability, &mut plan)?;
                continue;
            }

            if self.router.probe(capability)? {
                plan.settled
                    .push(CapabilityResult::granted(capability.clone()));
                continue;
            }

            if let Some(target) = self.router.settings_target(capability) {
                plan.navigate.push((capability.clone(), target?));
                plan.settled
                    .push(CapabilityResult::special(capability.clone()));
                continue;
            }

            match self.router.route(capability, surface)? {
                RoutingOutcome::AlreadyGranted => {
                    plan.settled
                        .push(CapabilityResult::granted(capability.clone()));
                }
                RoutingOutcome::NavigatedToSettings(_) => {
                    plan.settled
                        .push(CapabilityResult::special(capability.clone()));
                }
                RoutingOutcome::IssuedStandardPrompt(capabilities) => {
                    if capabilities.as_slice() == std::slice::from_ref(capability) {
                        self.plan_prompt(surface, capability.clone(), &mut plan)?;
                        continue;
                    }
                    plan.settled
                        .push(CapabilityResult::special(capability.clone()));
                    for substitute in capabilities {
                        if self.declarations.is_declared(&substitute) {
                            debug!(capability = %capability, substitute = %substitute, "prompting for substitute");
                            self.plan_prompt(surface, substitute, &mut plan)?;
                        } else {
                            warn!(capability = %capability, substitute = %substitute, "substitute not declared");
                            plan.settled.push(CapabilityResult::not_declared(substitute));
                        }
                    }
                }
            }
        }

        Ok(plan)
    }

    /// Open the settings screens of an admitted request.
    fn open_scoped_settings(
        &self,
        surface: &SurfaceId,
        targets: Vec<(Capability, SettingsTarget)>,
    ) -> Result<()> {
        for (capability, target) in targets {
            self.router.navigate(surface, &target)?;
            info!(capability = %capability, target = %target, "routed to settings");
            if self.config.show_toasts {
                self.ui.toast.notice(
                    surface,
                    &format!("Enable {} in settings", capability.display_name()),
                );
            }
        }
        Ok(())
    }

    fn plan_standard(
        &self,
        surface: &SurfaceId,
        capability: &Capability,
        plan: &mut Plan,
    ) -> Result<()> {
        let result = self.checker.check_for(surface, capability)?;
        if result.state == CapabilityState::Denied {
            self.plan_prompt(surface, capability.clone(), plan)
        } else {
            plan.settled.push(result);
            Ok(())
        }
    }

    /// Prompt for a denied capability unless the refusal is final.
    fn plan_prompt(&self, surface: &SurfaceId, capability: Capability, plan: &mut Plan) -> Result<()> {
        if !self.host.platform_level().supports_runtime_prompts() {
            // Install-time state is final.
            plan.settled.push(CapabilityResult::denied(capability, false));
            return Ok(());
        }
        let previously = self.history.was_prompted(&capability);
        if self
            .checker
            .is_permanently_denied(surface, &capability, previously)?
        {
            plan.settled
                .push(CapabilityResult::permanently_denied(capability));
        } else {
            plan.prompt_for(capability);
        }
        Ok(())
    }

    fn requires_rationale(&self, surface: &SurfaceId, capability: &Capability) -> bool {
        self.checker
            .requires_rationale(surface, capability)
            .unwrap_or_else(|e| {
                warn!(capability = %capability, error = %e, "rationale query failed");
                false
            })
    }

    fn rationale_after_refusal(&self, surface: &SurfaceId, capability: &Capability) -> bool {
        self.host
            .should_show_rationale(surface, capability)
            .unwrap_or_else(|e| {
                warn!(capability = %capability, error = %e, "rationale query failed");
                false
            })
    }

    fn reject(&self, id: RequestId, error: Error) -> Error {
        warn!(request_id = %id, %error, "request rejected");
        self.journal.record(
            Some(id),
            JournalKind::Rejected {
                reason: error.to_string(),
            },
        );
        error
    }

    /// Apply the caller's denial behavior to a request naming undeclared
    /// capabilities.
    fn deny_undeclared(&self, descriptor: &RequestDescriptor, error: &Error) {
        let Error::NotDeclared { missing } = error else {
            return;
        };
        if let Recovery::Degrade(degradation) =
            self.recovery.handle(error, descriptor.denial_behavior)
        {
            let callback = descriptor.callback.clone();
            callback.on_denied(missing);
            info!(request_id = %descriptor.id, ?degradation, "applying denial behavior");
            callback.on_degraded(degradation);
        }
    }

    fn resolve_now(
        &mut self,
        mut descriptor: RequestDescriptor,
        settled: Vec<CapabilityResult>,
    ) -> Submitted {
        let id = descriptor.id;
        advance(&mut descriptor, RequestState::Resolved);
        let results = assemble(descriptor.capabilities(), settled, Vec::new());
        self.finish(descriptor, results);
        Submitted {
            id,
            state: RequestState::Completed,
            prompted: Vec::new(),
            retry_after: None,
        }
    }

    fn dispatch(
        &mut self,
        mut descriptor: RequestDescriptor,
        prompt: Vec<Capability>,
        settled: Vec<CapabilityResult>,
    ) -> Submitted {
        let id = descriptor.id;
        advance(&mut descriptor, RequestState::AwaitingHost);
        let mut pending = Pending {
            descriptor,
            prompt,
            settled,
            dispatched: false,
        };

        match self.issue(&mut pending) {
            Ok(()) => {
                let prompted = pending.prompt.clone();
                self.registry.insert(id, pending);
                Submitted {
                    id,
                    state: RequestState::AwaitingHost,
                    prompted,
                    retry_after: None,
                }
            }
            Err(err) => match self.recover(&mut pending, err) {
                Some(delay) => {
                    self.registry.insert(id, pending);
                    Submitted {
                        id,
                        state: RequestState::AwaitingHost,
                        prompted: Vec::new(),
                        retry_after: Some(delay),
                    }
                }
                None => Submitted {
                    id,
                    state: RequestState::Completed,
                    prompted: Vec::new(),
                    retry_after: None,
                },
            },
        }
    }

    /// Ask the host to prompt for the pending request.
    fn issue(&mut self, pending: &mut Pending) -> Result<()> {
        let id = pending.descriptor.id;
        let surface = &pending.descriptor.surface;
        self.gate.record_start(id, &pending.prompt);

        match self.host.issue_prompt(surface, &pending.prompt) {
            Ok(()) => {
                self.recovery.record_success();
                self.history.record(&pending.prompt);
                pending.dispatched = true;
                debug!(request_id = %id, capabilities = %join(&pending.prompt), "prompt issued");
                self.journal.record(
                    Some(id),
                    JournalKind::Prompted {
                        capabilities: pending.prompt.clone(),
                    },
                );
                Ok(())
            }
            Err(source) => {
                self.gate.record_complete(id);
                warn!(request_id = %id, error = %source, "prompt failed");
                Err(Error::TransientHost {
                    attempts: self.recovery.attempts() + 1,
                    source,
                })
            }
        }
    }

    /// Apply recovery to a failed prompt. Returns the retry delay, or `None`
    /// when the request has been failed.
    ///
    /// On `None` the caller must not keep `pending` in the registry.
    fn recover(&mut self, pending: &mut Pending, err: Error) -> Option<Duration> {
        let id = pending.descriptor.id;
        match self
            .recovery
            .handle(&err, pending.descriptor.denial_behavior)
        {
            Recovery::Retry { attempt, delay } => {
                info!(request_id = %id, attempt, delay_ms = delay.as_millis() as u64, "prompt retry scheduled");
                self.journal.record(
                    Some(id),
                    JournalKind::RetryScheduled {
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    },
                );
                Some(delay)
            }
            recovery => {
                error!(request_id = %id, error = %err, "request failed");
                self.journal.record(
                    Some(id),
                    JournalKind::Failed {
                        error: err.to_string(),
                    },
                );
                if err.host_error().is_some_and(|e| !e.is_retryable()) {
                    self.verify_integrity();
                }
                let callback = pending.descriptor.callback.clone();
                callback.on_error(&err);
                if let Recovery::Degrade(degradation) = recovery {
                    callback.on_degraded(degradation);
                }
                advance(&mut pending.descriptor, RequestState::Cancelled);
                advance(&mut pending.descriptor, RequestState::Completed);
                None
            }
        }
    }

    /// Re-issue the prompt of a request whose earlier prompt failed.
    ///
    /// Returns the next retry delay when it failed again and another attempt
    /// is allowed.
    pub fn retry(&mut self, id: RequestId) -> Option<Duration> {
        let Some(mut pending) = self.registry.remove(&id) else {
            debug!(request_id = %id, "retry for unknown request dropped");
            return None;
        };
        if pending.dispatched || !pending.descriptor.is_active() {
            self.registry.insert(id, pending);
            return None;
        }

        let outcome = match self.gate.lockout_remaining() {
            Some(remaining) => {
                warn!(request_id = %id, remaining_ms = remaining.as_millis() as u64, "retry blocked by lockout");
                Err(Error::Rejected(Rejection::Lockout { remaining }))
            }
            None => self.issue(&mut pending),
        };
        match outcome {
            Ok(()) => {
                self.registry.insert(id, pending);
                None
            }
            Err(err) => {
                let delay = self.recover(&mut pending, err);
                if delay.is_some() {
                    self.registry.insert(id, pending);
                }
                delay
            }
        }
    }

    /// Deliver a host answer to the request it belongs to.
    ///
    /// The answer goes to the oldest active request whose capabilities
    /// contain every answered capability. Unmatched answers are dropped.
    pub fn deliver(&mut self, answer: HostAnswer) -> bool {
        let matched = self
            .registry
            .iter()
            .filter(|(_, p)| p.dispatched && p.descriptor.is_active() && p.accepts(&answer))
            .max_by_key(|(_, p)| p.descriptor.age())
            .map(|(id, _)| *id);

        match matched {
            Some(id) => self.complete(id, answer),
            None => {
                debug!(capabilities = answer.grants.len(), "unmatched host answer dropped");
                false
            }
        }
    }

    /// Deliver a host answer to a specific request.
    pub fn deliver_to(&mut self, id: RequestId, answer: HostAnswer) -> bool {
        let accepted = self
            .registry
            .get(&id)
            .is_some_and(|p| p.dispatched && p.descriptor.is_active() && p.accepts(&answer));
        if !accepted {
            debug!(request_id = %id, "host answer does not match request, dropped");
            return false;
        }
        self.complete(id, answer)
    }

    fn complete(&mut self, id: RequestId, answer: HostAnswer) -> bool {
        let Some(pending) = self.registry.remove(&id) else {
            return false;
        };
        self.gate.record_complete(id);

        let Pending {
            mut descriptor,
            prompt,
            settled,
            ..
        } = pending;
        let surface = descriptor.surface.clone();

        let mut answered = Vec::with_capacity(prompt.len());
        let mut granted = Vec::new();
        let mut refused = Vec::new();
        for capability in prompt {
            let result = match answer.is_granted(&capability) {
                Some(true) => {
                    granted.push(capability.clone());
                    CapabilityResult::granted(capability)
                }
                Some(false) => {
                    refused.push(capability.clone());
                    if self.rationale_after_refusal(&surface, &capability) {
                        let special = self.router.is_special(&capability);
                        CapabilityResult::denied(capability, !special)
                    } else {
                        // Just prompted, so no rationale means "don't ask again".
                        CapabilityResult::permanently_denied(capability)
                    }
                }
                None => {
                    refused.push(capability.clone());
                    CapabilityResult::denied(capability, false)
                }
            };
            answered.push(result);
        }

        self.journal
            .record(Some(id), JournalKind::Answered { granted, refused });
        advance(&mut descriptor, RequestState::Resolved);
        let results = assemble(descriptor.capabilities(), settled, answered);
        self.finish(descriptor, results);
        true
    }

    /// Deliver results and run the post-result UI.
    fn finish(&mut self, mut descriptor: RequestDescriptor, results: Vec<CapabilityResult>) {
        let id = descriptor.id;
        let surface = descriptor.surface.clone();
        let groups = ResultGroups::of(&results);

        info!(
            request_id = %id,
            granted = groups.granted.len(),
            denied = groups.denied.len(),
            permanently_denied = groups.permanently_denied.len(),
            "request resolved"
        );
        self.journal.record(Some(id), JournalKind::resolved(&results));

        let callback = descriptor.callback.clone();
        groups.dispatch(callback.as_ref(), &results);

        if self.config.show_toasts {
            let toast = &self.ui.toast;
            if !groups.granted.is_empty() {
                toast.granted(&surface, &groups.granted);
            }
            if !groups.denied.is_empty() {
                toast.denied(&surface, &groups.denied);
            }
            if !groups.permanently_denied.is_empty() {
                toast.permanently_denied(&surface, &groups.permanently_denied);
            }
        }

        if !descriptor.lazy && !groups.permanently_denied.is_empty() {
            let dialog = descriptor
                .dialog_provider
                .clone()
                .unwrap_or_else(|| self.ui.dialog.clone());
            if dialog.show(&surface, &groups.permanently_denied) == DialogChoice::OpenSettings {
                self.open_app_settings(&surface);
            }
        }

        if groups.any_refused() && !descriptor.continue_on_denied {
            let degradation = Degradation::from(descriptor.denial_behavior);
            info!(request_id = %id, ?degradation, "applying denial behavior");
            callback.on_degraded(degradation);
        }

        advance(&mut descriptor, RequestState::Completed);
    }

    fn open_app_settings(&self, surface: &SurfaceId) {
        let navigated = SettingsTarget::app_details(&self.app)
            .and_then(|target| self.router.navigate(surface, &target));
        if let Err(e) = navigated {
            warn!(surface = %surface, error = %e, "could not open application settings");
        }
    }

    /// Cancel a request. Any later host answer for it is dropped.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        let Some(pending) = self.registry.remove(&id) else {
            return false;
        };
        self.gate.record_complete(id);
        let mut descriptor = pending.descriptor;
        advance(&mut descriptor, RequestState::Cancelled);
        advance(&mut descriptor, RequestState::Completed);
        info!(request_id = %id, surface = %descriptor.surface, "request cancelled");
        self.journal.record(Some(id), JournalKind::Cancelled);
        true
    }

    /// Cancel every request owned by `surface`.
    pub fn cancel_all_for(&mut self, surface: &SurfaceId) -> usize {
        let ids: Vec<RequestId> = self
            .registry
            .iter()
            .filter(|(_, p)| &p.descriptor.surface == surface)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Expire requests older than the maximum age and purge stuck gate
    /// entries.
    pub fn sweep(&mut self) -> Vec<RequestId> {
        let max_age = self.config.requests.max_age();
        let expired: Vec<RequestId> = self
            .registry
            .iter()
            .filter(|(_, p)| p.descriptor.age() > max_age)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.expire(*id);
        }
        let purged = self.gate.sweep();
        if !expired.is_empty() || !purged.is_empty() {
            debug!(expired = expired.len(), purged = purged.len(), "sweep finished");
        }
        expired
    }

    fn expire(&mut self, id: RequestId) {
        let Some(pending) = self.registry.remove(&id) else {
            return;
        };
        self.gate.record_complete(id);
        let mut descriptor = pending.descriptor;
        warn!(
            request_id = %id,
            age_ms = descriptor.age().as_millis() as u64,
            "request expired"
        );
        advance(&mut descriptor, RequestState::Cancelled);
        advance(&mut descriptor, RequestState::Completed);
        self.journal.record(Some(id), JournalKind::Expired);
        descriptor.callback.on_cancelled();
    }

    /// Run the gate's integrity check, entering lockout when it fails.
    pub fn verify_integrity(&self) -> bool {
        if self.gate.integrity_check() {
            return true;
        }
        let reason = "integrity check failed";
        self.gate.trigger_lockout(reason);
        self.journal.record(
            None,
            JournalKind::LockoutTriggered {
                reason: reason.to_string(),
            },
        );
        false
    }

    /// The active request owned by `surface`, if any.
    pub fn active_request_for(&self, surface: &SurfaceId) -> Option<RequestId> {
        self.registry
            .iter()
            .find(|(_, p)| &p.descriptor.surface == surface && p.descriptor.is_active())
            .map(|(id, _)| *id)
    }

    pub fn state_of(&self, id: RequestId) -> Option<RequestState> {
        self.registry.get(&id).map(|p| p.descriptor.state())
    }

    /// Number of requests in the registry.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Cancel everything. Returns how many requests were cancelled.
    pub fn shutdown(&mut self) -> usize {
        let ids: Vec<RequestId> = self.registry.keys().copied().collect();
        let count = ids.into_iter().filter(|id| self.cancel(*id)).count();
        info!(cancelled = count, "orchestrator shut down");
        count
    }
}

/// Move `descriptor` to `next`, reporting a transition the state machine
/// does not allow.
fn advance(descriptor: &mut RequestDescriptor, next: RequestState) {
    let from = descriptor.state();
    if !descriptor.transition(next) {
        error!(request_id = %descriptor.id, %from, to = %next, "illegal request state transition");
        debug_assert!(false, "illegal request state transition {from} -> {next}");
    }
}

/// Order results by the request's capability order, with results for
/// substituted capabilities last.
fn assemble(
    requested: &[Capability],
    settled: Vec<CapabilityResult>,
    answered: Vec<CapabilityResult>,
) -> Vec<CapabilityResult> {
    let mut pool: Vec<CapabilityResult> = settled.into_iter().chain(answered).collect();
    let mut results = Vec::with_capacity(pool.len());
    for capability in requested {
        if let Some(pos) = pool.iter().position(|r| &r.capability == capability) {
            results.push(pool.remove(pos));
        }
    }
    results.extend(pool);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::{DialogProvider, RationaleProvider, Rationale};
    use crate::{GateConfig, RequestBuilder, RequestCallback};
    use capability::{ApiLevel, HostState, Manifest, ScriptedHost, known};
    use parking_lot::Mutex;

    const APP: &str = "dev.grantly.demo";

    #[derive(Default)]
    struct Recorder {
        results: Mutex<Vec<Vec<CapabilityResult>>>,
        errors: Mutex<Vec<String>>,
        degraded: Mutex<Vec<Degradation>>,
        denied: Mutex<Vec<Vec<Capability>>>,
        cancelled: Mutex<usize>,
    }

    impl RequestCallback for Recorder {
        fn on_results(&self, results: &[CapabilityResult]) {
            self.results.lock().push(results.to_vec());
        }

        fn on_denied(&self, capabilities: &[Capability]) {
            self.denied.lock().push(capabilities.to_vec());
        }

        fn on_error(&self, error: &Error) {
            self.errors.lock().push(error.to_string());
        }

        fn on_degraded(&self, degradation: Degradation) {
            self.degraded.lock().push(degradation);
        }

        fn on_cancelled(&self) {
            *self.cancelled.lock() += 1;
        }
    }

    fn states(results: &[CapabilityResult]) -> Vec<(&str, CapabilityState)> {
        results
            .iter()
            .map(|r| (r.capability.as_str(), r.state))
            .collect()
    }

    struct Fixture {
        host: Arc<ScriptedHost>,
        orchestrator: Orchestrator,
        recorder: Arc<Recorder>,
    }

    impl Fixture {
        fn new(level: u32, state: HostState) -> Self {
            Self::with_config(level, state, test_config(), UiProviders::default())
        }

        fn with_config(level: u32, state: HostState, config: GrantlyConfig, ui: UiProviders) -> Self {
            let host = Arc::new(ScriptedHost::new(APP.into(), ApiLevel(level), state));
            let manifest = Manifest::new(
                APP.into(),
                [
                    known::CAMERA,
                    known::MICROPHONE,
                    known::CONTACTS,
                    known::FINE_LOCATION,
                    known::BACKGROUND_LOCATION,
                    known::WRITE_SETTINGS,
                ]
                .map(Capability::from),
            );
            let declarations = Arc::new(DeclarationValidator::new(APP.into(), Arc::new(manifest)));
            let orchestrator =
                Orchestrator::new(APP.into(), config, host.clone(), declarations, ui);
            Self {
                host,
                orchestrator,
                recorder: Arc::new(Recorder::default()),
            }
        }

        fn request(&self, surface: &str, capabilities: &[&str]) -> RequestDescriptor {
            RequestBuilder::new(surface, self.orchestrator.config())
                .capabilities(capabilities.iter().copied())
                .shared_callback(self.recorder.clone())
                .build()
                .unwrap()
        }

        fn answer_pending(&mut self) -> bool {
            let pending = self.host.take_pending();
            let mut handled = false;
            for (_, capabilities) in pending {
                let answer = self.host.answer(&capabilities);
                handled |= self.orchestrator.deliver(answer);
            }
            handled
        }
    }

    fn test_config() -> GrantlyConfig {
        GrantlyConfig {
            gate: GateConfig {
                min_request_interval_ms: 0,
                ..GateConfig::default()
            },
            ..GrantlyConfig::default()
        }
    }

    #[test]
    fn granted_capabilities_resolve_without_prompt() {
        let mut f = Fixture::new(34, HostState::default());
        f.host.grant(&known::CAMERA.into());

        let submitted = f.orchestrator.submit(f.request("main", &["camera"])).unwrap();
        assert!(submitted.is_completed());
        assert_eq!(f.host.prompt_count(), 0);
        assert_eq!(
            states(&f.recorder.results.lock()[0]),
            vec![("camera", CapabilityState::Granted)]
        );
    }

    #[test]
    fn prompt_answer_resolves_request() {
        let mut state = HostState::default();
        state.grant_on_prompt.insert(known::CAMERA.into());
        let mut f = Fixture::new(34, state);

        let submitted = f
            .orchestrator
            .submit(f.request("main", &["camera", "microphone"]))
            .unwrap();
        assert_eq!(submitted.state, RequestState::AwaitingHost);
        assert_eq!(f.orchestrator.state_of(submitted.id), Some(RequestState::AwaitingHost));

        assert!(f.answer_pending());
        assert_eq!(f.orchestrator.in_flight(), 0);
        assert_eq!(
            states(&f.recorder.results.lock()[0]),
            vec![
                ("camera", CapabilityState::Granted),
                ("microphone", CapabilityState::Denied)
            ]
        );
    }

    #[test]
    fn undeclared_capability_blocks_the_whole_request() {
        let mut f = Fixture::new(34, HostState::default());
        let err = f
            .orchestrator
            .submit(f.request("main", &["camera", "sms"]))
            .unwrap_err();
        assert!(matches!(err, Error::NotDeclared { ref missing } if missing == &[Capability::from("sms")]));
        assert_eq!(f.host.prompt_count(), 0);
        assert!(f.recorder.results.lock().is_empty());
    }

    #[test]
    fn undeclared_capability_applies_denial_behavior() {
        use crate::DenialBehavior::*;

        for behavior in [ContinueAppFlow, DisableFeature, ExitAppWithDialog, ExitAppImmediately] {
            let mut f = Fixture::new(34, HostState::default());
            let descriptor = RequestBuilder::new("main", f.orchestrator.config())
                .capabilities(["camera", "undeclared-capability"])
                .denial_behavior(behavior)
                .shared_callback(f.recorder.clone())
                .build()
                .unwrap();

            let err = f.orchestrator.submit(descriptor).unwrap_err();
            assert!(matches!(err, Error::NotDeclared { .. }), "{behavior:?}");
            assert_eq!(*f.recorder.degraded.lock(), vec![Degradation::from(behavior)]);
            assert_eq!(
                *f.recorder.denied.lock(),
                vec![vec![Capability::from("undeclared-capability")]]
            );
            assert!(f.recorder.results.lock().is_empty());
            assert_eq!(f.host.prompt_count(), 0);
        }
    }

    #[test]
    fn rejected_request_opens_no_settings() {
        let mut f = Fixture::new(34, HostState::default());
        f.orchestrator.submit(f.request("main", &["microphone"])).unwrap();

        let err = f
            .orchestrator
            .submit(f.request("main", &[known::WRITE_SETTINGS, known::CAMERA]))
            .unwrap_err();
        assert!(matches!(err, Error::ConcurrentRequest { .. }));

        f.orchestrator.gate().trigger_lockout("integrity check failed");
        let err = f
            .orchestrator
            .submit(f.request("other", &[known::WRITE_SETTINGS]))
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(Rejection::Lockout { .. })));

        assert!(f.host.navigations().is_empty());
        assert_eq!(f.host.prompt_count(), 1);
    }

    #[test]
    fn second_request_on_same_surface_conflicts() {
        let mut f = Fixture::new(34, HostState::default());
        let first = f.orchestrator.submit(f.request("main", &["camera"])).unwrap();

        let err = f
            .orchestrator
            .submit(f.request("main", &["microphone"]))
            .unwrap_err();
        match err {
            Error::ConcurrentRequest { active, .. } => assert_eq!(active, first.id),
            other => panic!("unexpected error: {other}"),
        }
        assert!(f.orchestrator.submit(f.request("other", &["microphone"])).is_ok());
        assert_eq!(f.host.prompt_count(), 2);
    }

    #[test]
    fn cancelled_request_drops_late_answer() {
        let mut f = Fixture::new(34, HostState::default());
        let submitted = f.orchestrator.submit(f.request("main", &["camera"])).unwrap();
        assert!(f.orchestrator.cancel(submitted.id));
        assert!(!f.orchestrator.cancel(submitted.id));

        assert!(!f.answer_pending());
        assert!(f.recorder.results.lock().is_empty());
        assert_eq!(f.orchestrator.gate().in_flight(), 0);
    }

    #[test]
    fn answers_outside_the_request_are_not_matched() {
        let mut f = Fixture::new(34, HostState::default());
        let submitted = f.orchestrator.submit(f.request("main", &["camera"])).unwrap();

        let foreign = HostAnswer::new(vec![(known::MICROPHONE.into(), true)]);
        assert!(!f.orchestrator.deliver(foreign.clone()));
        assert!(!f.orchestrator.deliver_to(submitted.id, foreign));
        assert!(!f.orchestrator.deliver(HostAnswer::default()));
        assert_eq!(f.orchestrator.in_flight(), 1);
    }

    #[test]
    fn refusal_without_rationale_after_prompt_is_permanent() {
        let mut state = HostState::default();
        state.deny_permanently.insert(known::CONTACTS.into());
        let mut f = Fixture::new(34, state);

        f.orchestrator.submit(f.request("main", &["contacts"])).unwrap();
        f.answer_pending();
        assert_eq!(
            states(&f.recorder.results.lock()[0]),
            vec![("contacts", CapabilityState::PermanentlyDenied)]
        );

        // Known from history now: no second prompt.
        let submitted = f.orchestrator.submit(f.request("main", &["contacts"])).unwrap();
        assert!(submitted.is_completed());
        assert_eq!(f.host.prompt_count(), 1);
    }

    #[test]
    fn first_ask_without_rationale_is_prompted() {
        let mut f = Fixture::new(34, HostState::default());
        let submitted = f.orchestrator.submit(f.request("main", &["contacts"])).unwrap();
        assert_eq!(submitted.prompted, vec![Capability::from(known::CONTACTS)]);
    }

    #[test]
    fn settings_capabilities_never_await_the_host() {
        let mut f = Fixture::new(34, HostState::default());
        let submitted = f
            .orchestrator
            .submit(f.request("main", &[known::WRITE_SETTINGS]))
            .unwrap();
        assert!(submitted.is_completed());
        assert_eq!(f.host.prompt_count(), 0);
        assert_eq!(f.host.navigations().len(), 1);
        assert_eq!(
            states(&f.recorder.results.lock()[0]),
            vec![(known::WRITE_SETTINGS, CapabilityState::RequiresSpecialHandling)]
        );
    }

    #[test]
    fn background_location_prompts_for_its_prerequisite() {
        let mut f = Fixture::new(34, HostState::default());
        let submitted = f
            .orchestrator
            .submit(f.request("main", &[known::BACKGROUND_LOCATION]))
            .unwrap();
        assert_eq!(submitted.prompted, vec![Capability::from(known::FINE_LOCATION)]);

        f.answer_pending();
        assert_eq!(
            states(&f.recorder.results.lock()[0]),
            vec![
                (known::BACKGROUND_LOCATION, CapabilityState::RequiresSpecialHandling),
                (known::FINE_LOCATION, CapabilityState::Denied)
            ]
        );
    }

    #[test]
    fn refused_special_capability_needs_no_rationale() {
        let mut state = HostState::default();
        state.granted.insert(known::FINE_LOCATION.into());
        let mut f = Fixture::new(34, state);
        f.host.set_rationale(&known::BACKGROUND_LOCATION.into(), true);

        let submitted = f
            .orchestrator
            .submit(f.request("main", &[known::BACKGROUND_LOCATION]))
            .unwrap();
        assert_eq!(submitted.prompted, vec![Capability::from(known::BACKGROUND_LOCATION)]);

        f.answer_pending();
        let results = f.recorder.results.lock();
        assert_eq!(results[0][0].state, CapabilityState::Denied);
        assert!(!results[0][0].requires_rationale);
    }

    #[test]
    #[should_panic(expected = "illegal request state transition")]
    fn illegal_transition_is_reported() {
        let f = Fixture::new(34, HostState::default());
        let mut descriptor = f.request("main", &["camera"]);
        advance(&mut descriptor, RequestState::Resolved);
    }

    struct Decline;

    impl RationaleProvider for Decline {
        fn show(&self, _: &SurfaceId, _: &[Capability], _: &Rationale) -> bool {
            false
        }
    }

    #[test]
    fn declined_rationale_skips_the_prompt() {
        let mut f = Fixture::new(34, HostState::default());
        f.host.set_rationale(&known::CAMERA.into(), true);
        let descriptor = RequestBuilder::new("main", f.orchestrator.config())
            .capabilities([known::CAMERA])
            .rationale_provider(Decline)
            .shared_callback(f.recorder.clone())
            .build()
            .unwrap();

        let submitted = f.orchestrator.submit(descriptor).unwrap();
        assert!(submitted.is_completed());
        assert_eq!(f.host.prompt_count(), 0);
        let results = f.recorder.results.lock();
        assert_eq!(results[0][0].state, CapabilityState::Denied);
        assert!(results[0][0].requires_rationale);
    }

    #[test]
    fn lazy_requests_skip_rationale() {
        let mut f = Fixture::new(34, HostState::default());
        f.host.set_rationale(&known::CAMERA.into(), true);
        let descriptor = RequestBuilder::new("main", f.orchestrator.config())
            .capabilities([known::CAMERA])
            .lazy(true)
            .rationale_provider(Decline)
            .shared_callback(f.recorder.clone())
            .build()
            .unwrap();

        let submitted = f.orchestrator.submit(descriptor).unwrap();
        assert_eq!(submitted.state, RequestState::AwaitingHost);
        assert_eq!(f.host.prompt_count(), 1);
    }

    struct OpenSettings;

    impl DialogProvider for OpenSettings {
        fn show(&self, _: &SurfaceId, _: &[Capability]) -> DialogChoice {
            DialogChoice::OpenSettings
        }
    }

    #[test]
    fn permanent_denial_dialog_opens_scoped_settings() {
        let mut state = HostState::default();
        state.deny_permanently.insert(known::CAMERA.into());
        let ui = UiProviders::default().with_dialog(OpenSettings);
        let mut f = Fixture::with_config(34, state, test_config(), ui);

        f.orchestrator.submit(f.request("main", &["camera"])).unwrap();
        f.answer_pending();

        let navigations = f.host.navigations();
        assert_eq!(navigations.len(), 1);
        assert_eq!(navigations[0].action(), SettingsTarget::APP_DETAILS);
        assert!(navigations[0].is_scoped_to(&APP.into()));
    }

    #[test]
    fn failed_prompt_schedules_a_retry() {
        let mut f = Fixture::new(34, HostState::default());
        f.host.fail_next_prompts(1);

        let submitted = f.orchestrator.submit(f.request("main", &["camera"])).unwrap();
        assert!(submitted.retry_after.is_some());
        assert_eq!(f.host.prompt_count(), 0);

        assert_eq!(f.orchestrator.retry(submitted.id), None);
        assert_eq!(f.host.prompt_count(), 1);
        assert!(f.answer_pending());
    }

    #[test]
    fn retry_during_lockout_fails_without_prompting() {
        let mut f = Fixture::new(34, HostState::default());
        f.host.fail_next_prompts(1);

        let submitted = f.orchestrator.submit(f.request("main", &["camera"])).unwrap();
        assert!(submitted.retry_after.is_some());
        f.orchestrator.gate().trigger_lockout("integrity check failed");

        assert_eq!(f.orchestrator.retry(submitted.id), None);
        assert_eq!(f.host.prompt_count(), 0);
        assert_eq!(f.orchestrator.in_flight(), 0);
        let errors = f.recorder.errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("lockout"), "{}", errors[0]);
        assert_eq!(
            *f.recorder.degraded.lock(),
            vec![Degradation::ReducedFunctionality]
        );
    }

    #[test]
    fn exhausted_retries_degrade_through_the_callback() {
        let mut f = Fixture::new(34, HostState::default());
        f.host.fail_next_prompts(10);

        let submitted = f.orchestrator.submit(f.request("main", &["camera"])).unwrap();
        let mut next = submitted.retry_after;
        while next.is_some() {
            next = f.orchestrator.retry(submitted.id);
        }

        assert_eq!(f.orchestrator.in_flight(), 0);
        assert_eq!(f.recorder.errors.lock().len(), 1);
        assert_eq!(
            *f.recorder.degraded.lock(),
            vec![Degradation::ReducedFunctionality]
        );
    }

    #[test]
    fn unavailable_host_triggers_lockout() {
        let mut f = Fixture::new(34, HostState::default());
        let mut descriptor = f.request("main", &["camera"]);
        advance(&mut descriptor, RequestState::Validating);
        advance(&mut descriptor, RequestState::Checking);
        // Planning succeeds; the prompt itself hits an offline host.
        let plan = f.orchestrator.plan(&descriptor).unwrap();
        f.host.set_unavailable(true);
        let submitted = f.orchestrator.dispatch(descriptor, plan.prompt, plan.settled);

        assert!(submitted.is_completed());
        assert!(f.orchestrator.gate().in_lockout());
        assert!(f.recorder.errors.lock()[0].contains("host unavailable"));
    }

    #[test]
    fn continue_on_denied_false_applies_denial_behavior() {
        let mut f = Fixture::new(34, HostState::default());
        let descriptor = RequestBuilder::new("main", f.orchestrator.config())
            .capabilities([known::WRITE_SETTINGS])
            .denial_behavior(crate::DenialBehavior::DisableFeature)
            .continue_on_denied(false)
            .shared_callback(f.recorder.clone())
            .build()
            .unwrap();
        f.orchestrator.submit(descriptor).unwrap();
        assert_eq!(*f.recorder.degraded.lock(), vec![Degradation::FeatureDisabled]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_expires_old_requests() {
        let mut f = Fixture::new(34, HostState::default());
        let submitted = f.orchestrator.submit(f.request("main", &["camera"])).unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(f.orchestrator.sweep().is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(f.orchestrator.sweep(), vec![submitted.id]);
        assert_eq!(f.orchestrator.in_flight(), 0);
        assert_eq!(*f.recorder.cancelled.lock(), 1);
        assert!(!f.answer_pending());
    }

    #[test]
    fn cancel_all_for_surface() {
        let mut f = Fixture::new(34, HostState::default());
        f.orchestrator.submit(f.request("main", &["camera"])).unwrap();
        f.orchestrator.submit(f.request("other", &["camera"])).unwrap();

        assert_eq!(f.orchestrator.cancel_all_for(&"main".into()), 1);
        assert_eq!(f.orchestrator.in_flight(), 1);
        assert_eq!(f.orchestrator.shutdown(), 1);
    }

    #[test]
    fn assemble_keeps_request_order() {
        let requested: Vec<Capability> = vec!["a".into(), "b".into()];
        let results = assemble(
            &requested,
            vec![CapabilityResult::granted("b".into())],
            vec![
                CapabilityResult::denied("extra".into(), false),
                CapabilityResult::granted("a".into()),
            ],
        );
        let order: Vec<&str> = results.iter().map(|r| r.capability.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "extra"]);
    }
}
