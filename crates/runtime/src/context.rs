//! The engine entry point.

use std::sync::Arc;

use capability::{
    AppId, Capability, CapabilityResult, DeclarationSource, DeclarationValidator, Host,
    StateChecker,
};
use tracing::{info, warn};

use crate::ui::UiProviders;
use crate::{
    EngineHandle, Error, EventLoop, GateStatus, GrantlyConfig, IsolationGate, Journal,
    Orchestrator, Recovery, RecoveryManager, RequestBuilder, RequestId, Result, Submitted,
};

/// A running engine: configuration, read-only views of its components, and
/// the handle to its event loop.
///
/// # Example
///
/// ```ignore
/// let grantly = Grantly::init(config, host, manifest, UiProviders::default())?;
///
/// let request = grantly
///     .request("main")
///     .capabilities(["camera", "microphone"])
///     .callback(|results: &[CapabilityResult]| println!("{results:?}"));
/// let submitted = grantly.execute(request).await?;
/// ```
pub struct Grantly {
    app: AppId,
    config: GrantlyConfig,
    declarations: Arc<DeclarationValidator>,
    checker: Arc<StateChecker>,
    gate: Arc<IsolationGate>,
    journal: Arc<Journal>,
    handle: EngineHandle,
}

impl Grantly {
    /// Validate `config`, read the application identity and declarations
    /// from the host, and spawn the event loop.
    ///
    /// Cosmetic configuration problems are repaired with defaults; any
    /// structural problem fails initialization. Must be called from within
    /// a Tokio runtime.
    pub fn init(
        config: GrantlyConfig,
        host: Arc<dyn Host>,
        source: Arc<dyn DeclarationSource>,
        ui: UiProviders,
    ) -> Result<Self> {
        let (grantly, event_loop) = Self::build(config, host, source, ui)?;
        tokio::spawn(event_loop.run());
        Ok(grantly)
    }

    /// Like [`init`](Self::init), but leaves running the event loop to the
    /// caller.
    pub fn build(
        mut config: GrantlyConfig,
        host: Arc<dyn Host>,
        source: Arc<dyn DeclarationSource>,
        ui: UiProviders,
    ) -> Result<(Self, EventLoop)> {
        let recovery = RecoveryManager::new(config.recovery.clone());
        for issue in config.issues() {
            let error = Error::InvalidConfiguration(issue.clone());
            match recovery.handle(&error, config.denial_behavior) {
                Recovery::UseDefaults if config.repair(&issue) => {
                    warn!(%issue, "configuration repaired with defaults");
                }
                _ => return Err(error),
            }
        }

        let app = host.app_id()?;
        let declarations = Arc::new(DeclarationValidator::new(app.clone(), source));
        let declared = declarations.declared()?;

        let orchestrator = Orchestrator::new(
            app.clone(),
            config.clone(),
            host.clone(),
            declarations.clone(),
            ui,
        );
        let checker = orchestrator.checker().clone();
        let gate = orchestrator.gate().clone();
        let journal = orchestrator.journal().clone();
        let (event_loop, handle) = EventLoop::new(orchestrator);

        info!(
            app = %app,
            level = %host.platform_level(),
            declared = declared.len(),
            "grantly initialized"
        );

        let grantly = Self {
            app,
            config,
            declarations,
            checker,
            gate,
            journal,
            handle,
        };
        Ok((grantly, event_loop))
    }

    pub fn app(&self) -> &AppId {
        &self.app
    }

    /// The effective configuration, after repairs.
    pub fn config(&self) -> &GrantlyConfig {
        &self.config
    }

    /// Start a request from `surface` with the configured defaults.
    pub fn request(&self, surface: &str) -> RequestBuilder {
        RequestBuilder::new(surface, &self.config)
    }

    /// Build and submit a request.
    pub async fn execute(&self, request: RequestBuilder) -> Result<Submitted> {
        self.handle.submit(request.build()?).await
    }

    /// Classify `capability` without prompting.
    pub fn check(&self, capability: impl Into<Capability>) -> Result<CapabilityResult> {
        Ok(self.checker.check(&capability.into())?)
    }

    pub fn checker(&self) -> &StateChecker {
        &self.checker
    }

    pub fn gate_status(&self) -> GateStatus {
        self.gate.status()
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Forget cached declarations, e.g. after an application update.
    pub fn invalidate_declarations(&self) {
        self.declarations.invalidate(&self.app);
    }

    /// Cancel a request by id.
    pub async fn cancel(&self, id: RequestId) -> Result<()> {
        if self.handle.cancel(id).await? {
            Ok(())
        } else {
            Err(Error::RequestNotFound(id))
        }
    }

    /// Cancel every request and stop the event loop.
    pub async fn shutdown(&self) -> Result<usize> {
        self.handle.shutdown().await
    }
}
