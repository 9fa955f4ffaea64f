//! Engine configuration loaded from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ui::Rationale;
use crate::{ConfigIssue, Error, Result};

/// Theme names the default UI providers understand.
pub const THEMES: &[&str] = &["default", "light", "dark", "system"];

const DEFAULT_THEME: &str = "default";

/// What the application does when a capability is ultimately not granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialBehavior {
    /// Keep going with reduced functionality.
    #[default]
    ContinueAppFlow,
    /// Turn off the feature that needed the capability.
    DisableFeature,
    /// Explain, then leave.
    ExitAppWithDialog,
    /// Leave right away.
    ExitAppImmediately,
}

/// Top-level engine configuration.
///
/// ```toml
/// default_lazy = false
/// denial_behavior = "disable_feature"
/// show_toasts = true
///
/// [gate]
/// max_concurrent = 2
///
/// [recovery]
/// max_attempts = 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantlyConfig {
    /// Whether requests defer their UI until the feature is used.
    pub default_lazy: bool,

    pub denial_behavior: DenialBehavior,

    /// Whether the rationale provider is consulted before re-asking.
    pub show_rationale: bool,

    pub rationale_title: String,
    pub rationale_message: String,

    pub dialog_theme: String,
    pub toast_theme: String,

    /// Whether a toast is shown per result group.
    pub show_toasts: bool,

    /// Whether the CLI logs at `info` rather than `warn` by default.
    pub logging: bool,

    pub gate: GateConfig,
    pub recovery: RecoveryConfig,
    pub requests: RequestsConfig,
}

impl Default for GrantlyConfig {
    fn default() -> Self {
        Self {
            default_lazy: false,
            denial_behavior: DenialBehavior::default(),
            show_rationale: true,
            rationale_title: "Permission Required".to_string(),
            rationale_message: "This permission is needed for the app to function properly."
                .to_string(),
            dialog_theme: DEFAULT_THEME.to_string(),
            toast_theme: DEFAULT_THEME.to_string(),
            show_toasts: false,
            logging: false,
            gate: GateConfig::default(),
            recovery: RecoveryConfig::default(),
            requests: RequestsConfig::default(),
        }
    }
}

/// Isolation gate limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum time between two admitted requests.
    pub min_request_interval_ms: u64,
    /// Ceiling on tracked in-flight requests.
    pub max_concurrent: usize,
    /// In-flight entries older than this are purged as stuck.
    pub request_timeout_ms: u64,
    /// How long a lockout rejects every request.
    pub lockout_ms: u64,
    pub max_capability_len: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_request_interval_ms: 1000,
            max_concurrent: 3,
            request_timeout_ms: 30_000,
            lockout_ms: 5000,
            max_capability_len: 256,
        }
    }
}

impl GateConfig {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn lockout(&self) -> Duration {
        Duration::from_millis(self.lockout_ms)
    }
}

/// Retry and staleness limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the delay added as random jitter.
    pub jitter: f64,
    /// A blocking request older than this is treated as stuck.
    pub stale_after_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
            jitter: 0.1,
            stale_after_ms: 30_000,
        }
    }
}

impl RecoveryConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

/// Request registry limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestsConfig {
    /// Descriptors older than this are expired by the sweep.
    pub max_age_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            max_age_ms: 300_000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl RequestsConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl GrantlyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| {
            Error::InvalidConfiguration(ConfigIssue::structural("config", e.to_string()))
        })
    }

    /// Every problem with this configuration, in field order.
    pub fn issues(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.rationale_title.trim().is_empty() {
            issues.push(ConfigIssue::structural(
                "rationale_title",
                "rationale title cannot be empty",
            ));
        }
        if self.rationale_message.trim().is_empty() {
            issues.push(ConfigIssue::structural(
                "rationale_message",
                "rationale message cannot be empty",
            ));
        }
        for (field, theme) in [
            ("dialog_theme", &self.dialog_theme),
            ("toast_theme", &self.toast_theme),
        ] {
            if !THEMES.contains(&theme.as_str()) {
                issues.push(
                    ConfigIssue::cosmetic(field, format!("unknown theme '{theme}'"))
                        .with_fix(format!("use one of: {}", THEMES.join(", "))),
                );
            }
        }
        if self.gate.max_concurrent == 0 {
            issues.push(
                ConfigIssue::structural("gate.max_concurrent", "must allow at least one request")
                    .with_fix("set max_concurrent >= 1"),
            );
        }
        if self.recovery.max_attempts == 0 {
            issues.push(
                ConfigIssue::structural("recovery.max_attempts", "must allow at least one attempt")
                    .with_fix("set max_attempts >= 1"),
            );
        }
        if !(0.0..=1.0).contains(&self.recovery.jitter) {
            issues.push(ConfigIssue::structural(
                "recovery.jitter",
                format!("{} is outside [0, 1]", self.recovery.jitter),
            ));
        }
        if self.recovery.base_delay_ms > self.recovery.max_delay_ms {
            issues.push(
                ConfigIssue::structural(
                    "recovery.base_delay_ms",
                    format!(
                        "base delay {}ms exceeds max delay {}ms",
                        self.recovery.base_delay_ms, self.recovery.max_delay_ms
                    ),
                )
                .with_fix("lower base_delay_ms or raise max_delay_ms"),
            );
        }

        issues
    }

    /// Report the first problem with this configuration.
    pub fn validate(&self) -> std::result::Result<(), ConfigIssue> {
        match self.issues().into_iter().next() {
            Some(issue) => Err(issue),
            None => Ok(()),
        }
    }

    /// Substitute the default for the field `issue` names.
    ///
    /// Only cosmetic fields can be repaired; returns whether anything changed.
    pub fn repair(&mut self, issue: &ConfigIssue) -> bool {
        if !issue.is_cosmetic() {
            return false;
        }
        match issue.field.as_str() {
            "dialog_theme" => self.dialog_theme = DEFAULT_THEME.to_string(),
            "toast_theme" => self.toast_theme = DEFAULT_THEME.to_string(),
            _ => return false,
        }
        true
    }

    /// The rationale shown when a request sets none of its own.
    pub fn default_rationale(&self) -> Rationale {
        Rationale::new(&self.rationale_title, &self.rationale_message)
    }

    /// Default log filter directive.
    pub fn log_level(&self) -> &'static str {
        if self.logging { "info" } else { "warn" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IssueKind;

    #[test]
    fn defaults_match_documented_values() {
        let config = GrantlyConfig::default();
        assert!(!config.default_lazy);
        assert_eq!(config.denial_behavior, DenialBehavior::ContinueAppFlow);
        assert_eq!(config.rationale_title, "Permission Required");
        assert_eq!(config.gate.max_concurrent, 3);
        assert_eq!(config.gate.lockout(), Duration::from_secs(5));
        assert_eq!(config.recovery.max_delay_ms, 8000);
        assert_eq!(config.requests.max_age(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_toml() {
        let config = GrantlyConfig::parse(
            r#"
denial_behavior = "exit_app_with_dialog"
show_toasts = true

[gate]
max_concurrent = 1
min_request_interval_ms = 0
"#,
        )
        .unwrap();
        assert_eq!(config.denial_behavior, DenialBehavior::ExitAppWithDialog);
        assert!(config.show_toasts);
        assert_eq!(config.gate.max_concurrent, 1);
        assert_eq!(config.gate.lockout_ms, 5000);
        assert_eq!(config.recovery, RecoveryConfig::default());
    }

    #[test]
    fn parse_failure_is_structural() {
        let err = GrantlyConfig::parse("denial_behavior = \"shrug\"").unwrap_err();
        match err {
            Error::InvalidConfiguration(issue) => assert_eq!(issue.kind, IssueKind::Structural),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_theme_is_cosmetic_and_repairable() {
        let mut config = GrantlyConfig {
            toast_theme: "neon".into(),
            ..GrantlyConfig::default()
        };
        let issue = config.validate().unwrap_err();
        assert_eq!(issue.kind, IssueKind::Cosmetic);
        assert_eq!(issue.field, "toast_theme");

        assert!(config.repair(&issue));
        assert_eq!(config.toast_theme, "default");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn structural_issues_are_not_repaired() {
        let mut config = GrantlyConfig::default();
        config.recovery.base_delay_ms = 10_000;
        let issue = config.validate().unwrap_err();
        assert_eq!(issue.kind, IssueKind::Structural);
        assert!(!config.repair(&issue));

        let mut config = GrantlyConfig::default();
        config.recovery.jitter = 1.5;
        config.gate.max_concurrent = 0;
        assert_eq!(config.issues().len(), 2);
    }
}
