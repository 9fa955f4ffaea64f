//! Caller-supplied result callbacks.

use capability::{Capability, CapabilityResult, CapabilityState};

use crate::{Degradation, Error};

/// Receives the outcome of one request.
///
/// Every callback runs on the engine's event loop, one request at a time.
/// Only [`on_results`](Self::on_results) is required; the grouped hooks are
/// called after it with the capabilities of each non-empty group.
pub trait RequestCallback: Send + Sync {
    /// The aggregated result list, once per completed request.
    fn on_results(&self, results: &[CapabilityResult]);

    fn on_granted(&self, _capabilities: &[Capability]) {}

    /// Denied, not declared, or requiring special handling.
    fn on_denied(&self, _capabilities: &[Capability]) {}

    fn on_permanently_denied(&self, _capabilities: &[Capability]) {}

    /// The request ended without results.
    fn on_cancelled(&self) {}

    /// A failure after the request was dispatched.
    fn on_error(&self, _error: &Error) {}

    /// The caller's denial behavior was applied.
    fn on_degraded(&self, _degradation: Degradation) {}
}

impl<F> RequestCallback for F
where
    F: Fn(&[CapabilityResult]) + Send + Sync,
{
    fn on_results(&self, results: &[CapabilityResult]) {
        self(results)
    }
}

/// Results split into the groups the callback hooks receive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultGroups {
    pub granted: Vec<Capability>,
    pub denied: Vec<Capability>,
    pub permanently_denied: Vec<Capability>,
}

impl ResultGroups {
    pub fn of(results: &[CapabilityResult]) -> Self {
        let mut groups = Self::default();
        for result in results {
            let capability = result.capability.clone();
            match result.state {
                CapabilityState::Granted => groups.granted.push(capability),
                CapabilityState::PermanentlyDenied => groups.permanently_denied.push(capability),
                CapabilityState::Denied
                | CapabilityState::NotDeclared
                | CapabilityState::RequiresSpecialHandling => groups.denied.push(capability),
            }
        }
        groups
    }

    /// Whether anything was not granted.
    pub fn any_refused(&self) -> bool {
        !self.denied.is_empty() || !self.permanently_denied.is_empty()
    }

    /// Call `on_results` and then each non-empty grouped hook.
    pub fn dispatch(&self, callback: &dyn RequestCallback, results: &[CapabilityResult]) {
        callback.on_results(results);
        if !self.granted.is_empty() {
            callback.on_granted(&self.granted);
        }
        if !self.denied.is_empty() {
            callback.on_denied(&self.denied);
        }
        if !self.permanently_denied.is_empty() {
            callback.on_permanently_denied(&self.permanently_denied);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl RequestCallback for Recorder {
        fn on_results(&self, results: &[CapabilityResult]) {
            self.calls.lock().push(format!("results:{}", results.len()));
        }

        fn on_granted(&self, capabilities: &[Capability]) {
            self.calls.lock().push(format!("granted:{}", capabilities.len()));
        }

        fn on_denied(&self, capabilities: &[Capability]) {
            self.calls.lock().push(format!("denied:{}", capabilities.len()));
        }
    }

    #[test]
    fn special_and_undeclared_count_as_denied() {
        let results = vec![
            CapabilityResult::granted("camera".into()),
            CapabilityResult::special("write-settings".into()),
            CapabilityResult::not_declared("sms".into()),
            CapabilityResult::permanently_denied("contacts".into()),
        ];
        let groups = ResultGroups::of(&results);
        assert_eq!(groups.granted, vec![Capability::from("camera")]);
        assert_eq!(
            groups.denied,
            vec![Capability::from("write-settings"), Capability::from("sms")]
        );
        assert_eq!(groups.permanently_denied, vec![Capability::from("contacts")]);
        assert!(groups.any_refused());
    }

    #[test]
    fn dispatch_skips_empty_groups() {
        let recorder = Recorder::default();
        let results = vec![
            CapabilityResult::granted("camera".into()),
            CapabilityResult::denied("microphone".into(), true),
        ];
        ResultGroups::of(&results).dispatch(&recorder, &results);
        assert_eq!(
            *recorder.calls.lock(),
            vec!["results:2", "granted:1", "denied:1"]
        );
    }

    #[test]
    fn closures_are_callbacks() {
        let seen = Mutex::new(0);
        let callback = |results: &[CapabilityResult]| *seen.lock() += results.len();
        callback.on_results(&[CapabilityResult::granted("camera".into())]);
        assert_eq!(*seen.lock(), 1);
    }
}
