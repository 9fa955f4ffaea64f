//! Default UI providers that only log.

use capability::{Capability, SurfaceId};
use tracing::info;

use super::{DialogChoice, DialogProvider, Rationale, RationaleProvider, ToastProvider};

/// Logs every UI call; accepts rationales and dismisses dialogs.
///
/// Useful for headless hosts and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingUi;

fn names(capabilities: &[Capability]) -> String {
    capabilities
        .iter()
        .map(Capability::display_name)
        .collect::<Vec<_>>()
        .join(", ")
}

impl DialogProvider for LoggingUi {
    fn show(&self, surface: &SurfaceId, capabilities: &[Capability]) -> DialogChoice {
        info!(surface = %surface, capabilities = %names(capabilities), "permanently denied, dialog dismissed");
        DialogChoice::Dismiss
    }
}

impl RationaleProvider for LoggingUi {
    fn show(
        &self,
        surface: &SurfaceId,
        capabilities: &[Capability],
        rationale: &Rationale,
    ) -> bool {
        info!(
            surface = %surface,
            capabilities = %names(capabilities),
            title = %rationale.title,
            "{}",
            rationale.message
        );
        true
    }
}

impl ToastProvider for LoggingUi {
    fn granted(&self, surface: &SurfaceId, capabilities: &[Capability]) {
        info!(surface = %surface, "granted: {}", names(capabilities));
    }

    fn denied(&self, surface: &SurfaceId, capabilities: &[Capability]) {
        info!(surface = %surface, "denied: {}", names(capabilities));
    }

    fn permanently_denied(&self, surface: &SurfaceId, capabilities: &[Capability]) {
        info!(surface = %surface, "denied, enable in settings: {}", names(capabilities));
    }

    fn notice(&self, surface: &SurfaceId, message: &str) {
        info!(surface = %surface, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_ui_accepts_and_dismisses() {
        let surface = SurfaceId::from("main");
        let caps = vec![Capability::from("camera")];
        let rationale = Rationale::new("Camera", "Needed to scan codes.");

        assert!(RationaleProvider::show(&LoggingUi, &surface, &caps, &rationale));
        assert_eq!(
            DialogProvider::show(&LoggingUi, &surface, &caps),
            DialogChoice::Dismiss
        );
    }

    #[test]
    fn display_names_are_joined() {
        let caps = vec![
            Capability::from("camera"),
            Capability::from("fine-location"),
        ];
        assert_eq!(names(&caps), "Camera, Location");
    }
}
