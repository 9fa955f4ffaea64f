//! Capability state classification.

use std::sync::Arc;

use crate::{
    Capability, CapabilityResult, DeclarationValidator, Host, Result, SpecialRouter, SurfaceId,
};

/// Classifies the current grantedness of capabilities.
///
/// Nothing is cached: every call re-derives the state from the host.
pub struct StateChecker {
    host: Arc<dyn Host>,
    declarations: Arc<DeclarationValidator>,
    router: Arc<SpecialRouter>,
}

impl StateChecker {
    pub fn new(
        host: Arc<dyn Host>,
        declarations: Arc<DeclarationValidator>,
        router: Arc<SpecialRouter>,
    ) -> Self {
        Self {
            host,
            declarations,
            router,
        }
    }

    /// Classify `capability`. `requires_rationale` is always false here; see
    /// [`check_for`](Self::check_for).
    pub fn check(&self, capability: &Capability) -> Result<CapabilityResult> {
        if !self.declarations.is_declared(capability) {
            return Ok(CapabilityResult::not_declared(capability.clone()));
        }

        if self.router.is_special(capability) {
            return Ok(if self.router.probe(capability)? {
                CapabilityResult::granted(capability.clone())
            } else {
                CapabilityResult::special(capability.clone())
            });
        }

        // Before runtime prompts this is the install-time grant, which is final.
        Ok(if self.host.query_grant_state(capability)? {
            CapabilityResult::granted(capability.clone())
        } else {
            CapabilityResult::denied(capability.clone(), false)
        })
    }

    /// Classify `capability` as seen from `surface`, filling in
    /// `requires_rationale` for denied capabilities.
    pub fn check_for(&self, surface: &SurfaceId, capability: &Capability) -> Result<CapabilityResult> {
        let result = self.check(capability)?;
        if result.is_denied() {
            let rationale = self.requires_rationale(surface, capability)?;
            return Ok(result.with_rationale(rationale));
        }
        Ok(result)
    }

    /// Whether an explanatory prompt should precede asking again.
    ///
    /// Always false for special capabilities and before runtime prompts.
    pub fn requires_rationale(&self, surface: &SurfaceId, capability: &Capability) -> Result<bool> {
        if self.router.is_special(capability) || !self.host.platform_level().supports_runtime_prompts()
        {
            return Ok(false);
        }
        Ok(self.host.should_show_rationale(surface, capability)?)
    }

    /// Whether `capability` is denied in a way only settings can undo.
    ///
    /// The host reports "no rationale" both for a first-ever ask and for a
    /// permanent refusal, so the caller must say whether the capability has
    /// been prompted for before.
    pub fn is_permanently_denied(
        &self,
        surface: &SurfaceId,
        capability: &Capability,
        previously_requested: bool,
    ) -> Result<bool> {
        if !self.host.platform_level().supports_runtime_prompts() {
            return Ok(false);
        }
        if self.host.query_grant_state(capability)? {
            return Ok(false);
        }
        if self.host.should_show_rationale(surface, capability)? {
            return Ok(false);
        }
        Ok(previously_requested)
    }

    pub fn check_all(&self, capabilities: &[Capability]) -> Result<Vec<CapabilityResult>> {
        capabilities.iter().map(|c| self.check(c)).collect()
    }

    pub fn has_all(&self, capabilities: &[Capability]) -> Result<bool> {
        for capability in capabilities {
            if !self.check(capability)?.is_granted() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn has_any(&self, capabilities: &[Capability]) -> Result<bool> {
        for capability in capabilities {
            if self.check(capability)?.is_granted() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn granted_of(&self, capabilities: &[Capability]) -> Result<Vec<Capability>> {
        Ok(self
            .check_all(capabilities)?
            .into_iter()
            .filter(CapabilityResult::is_granted)
            .map(|r| r.capability)
            .collect())
    }

    pub fn denied_of(&self, capabilities: &[Capability]) -> Result<Vec<Capability>> {
        Ok(self
            .check_all(capabilities)?
            .into_iter()
            .filter(|r| r.is_denied() || r.is_permanently_denied())
            .map(|r| r.capability)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ApiLevel, CapabilityState, HostState, Manifest, ScriptedHost, known};

    const APP: &str = "dev.grantly.demo";

    fn setup(level: u32, declared: &[&str]) -> (Arc<ScriptedHost>, StateChecker) {
        let host = Arc::new(ScriptedHost::new(APP.into(), ApiLevel(level), HostState::default()));
        let manifest = Manifest::new(APP.into(), declared.iter().map(|c| Capability::from(*c)));
        let declarations = Arc::new(DeclarationValidator::new(APP.into(), Arc::new(manifest)));
        let router = Arc::new(SpecialRouter::new(APP.into(), host.clone()));
        let checker = StateChecker::new(host.clone(), declarations, router);
        (host, checker)
    }

    #[test]
    fn undeclared_is_not_declared() {
        let (_, checker) = setup(34, &["camera"]);
        let result = checker.check(&"microphone".into()).unwrap();
        assert_eq!(result.state, CapabilityState::NotDeclared);
    }

    #[test]
    fn runtime_grant_state() {
        let (host, checker) = setup(34, &["camera"]);
        assert_eq!(checker.check(&"camera".into()).unwrap().state, CapabilityState::Denied);
        host.grant(&"camera".into());
        assert_eq!(checker.check(&"camera".into()).unwrap().state, CapabilityState::Granted);
    }

    #[test]
    fn special_requires_special_handling() {
        let (host, checker) = setup(34, &[known::WRITE_SETTINGS]);
        let cap = Capability::from(known::WRITE_SETTINGS);
        assert_eq!(
            checker.check(&cap).unwrap().state,
            CapabilityState::RequiresSpecialHandling
        );
        host.grant_special(&cap);
        assert_eq!(checker.check(&cap).unwrap().state, CapabilityState::Granted);
    }

    #[test]
    fn no_rationale_before_runtime_prompts() {
        let (host, checker) = setup(22, &["camera"]);
        host.set_rationale(&"camera".into(), true);
        assert!(!checker.requires_rationale(&"main".into(), &"camera".into()).unwrap());
    }

    #[test]
    fn install_time_grant_is_final() {
        let (host, checker) = setup(22, &["camera", "microphone"]);
        host.grant(&"camera".into());
        host.set_rationale(&"microphone".into(), true);

        assert_eq!(checker.check(&"camera".into()).unwrap().state, CapabilityState::Granted);
        let refused = checker.check_for(&"main".into(), &"microphone".into()).unwrap();
        assert_eq!(refused.state, CapabilityState::Denied);
        assert!(!refused.requires_rationale);
        assert!(!checker.is_permanently_denied(&"main".into(), &"microphone".into(), true).unwrap());
    }

    #[test]
    fn check_for_fills_rationale() {
        let (host, checker) = setup(34, &["camera"]);
        host.set_rationale(&"camera".into(), true);
        let result = checker.check_for(&"main".into(), &"camera".into()).unwrap();
        assert!(result.is_denied());
        assert!(result.requires_rationale);
    }

    #[test]
    fn first_ask_is_not_permanent() {
        let (_, checker) = setup(34, &["camera"]);
        let surface = SurfaceId::from("main");
        let camera = Capability::from("camera");
        assert!(!checker.is_permanently_denied(&surface, &camera, false).unwrap());
        assert!(checker.is_permanently_denied(&surface, &camera, true).unwrap());
    }

    #[test]
    fn aggregate_helpers() {
        let (host, checker) = setup(34, &["camera", "microphone"]);
        let both: Vec<Capability> = vec!["camera".into(), "microphone".into()];
        host.grant(&"camera".into());

        assert!(checker.has_any(&both).unwrap());
        assert!(!checker.has_all(&both).unwrap());
        assert_eq!(checker.granted_of(&both).unwrap(), vec![Capability::from("camera")]);
        assert_eq!(checker.denied_of(&both).unwrap(), vec![Capability::from("microphone")]);
    }
}
