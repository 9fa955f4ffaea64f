//! UI collaborators the orchestrator calls into.

mod logging;
mod provider;

pub use logging::LoggingUi;
pub use provider::{DialogChoice, DialogProvider, Rationale, RationaleProvider, ToastProvider};

use std::sync::Arc;

/// One provider of each kind.
///
/// Defaults to [`LoggingUi`] for all three.
#[derive(Clone)]
pub struct UiProviders {
    pub dialog: Arc<dyn DialogProvider>,
    pub rationale: Arc<dyn RationaleProvider>,
    pub toast: Arc<dyn ToastProvider>,
}

impl UiProviders {
    pub fn with_dialog(mut self, dialog: impl DialogProvider + 'static) -> Self {
        self.dialog = Arc::new(dialog);
        self
    }

    pub fn with_rationale(mut self, rationale: impl RationaleProvider + 'static) -> Self {
        self.rationale = Arc::new(rationale);
        self
    }

    pub fn with_toast(mut self, toast: impl ToastProvider + 'static) -> Self {
        self.toast = Arc::new(toast);
        self
    }
}

impl Default for UiProviders {
    fn default() -> Self {
        let ui = Arc::new(LoggingUi);
        Self {
            dialog: ui.clone(),
            rationale: ui.clone(),
            toast: ui,
        }
    }
}

impl std::fmt::Debug for UiProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiProviders").finish_non_exhaustive()
    }
}
