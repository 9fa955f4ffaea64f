//! Which capabilities have been prompted for in this process.

use std::collections::HashSet;

use capability::Capability;

/// Remembers every capability that reached a host prompt.
///
/// The host answers "no rationale" both before the first ask and after a
/// permanent refusal; only a capability recorded here can be permanently
/// denied.
#[derive(Debug, Default, Clone)]
pub struct PromptHistory {
    prompted: HashSet<Capability>,
}

impl PromptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, capabilities: &[Capability]) {
        self.prompted.extend(capabilities.iter().cloned());
    }

    pub fn was_prompted(&self, capability: &Capability) -> bool {
        self.prompted.contains(capability)
    }

    pub fn len(&self) -> usize {
        self.prompted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompted.is_empty()
    }
}
