//! Failure classification, retry, and graceful degradation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{DenialBehavior, Error, RecoveryConfig, RequestId};

/// The caller-visible outcome of applying a [`DenialBehavior`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    ReducedFunctionality,
    FeatureDisabled,
    ExitWithDialog,
    ExitImmediately,
}

impl From<DenialBehavior> for Degradation {
    fn from(behavior: DenialBehavior) -> Self {
        match behavior {
            DenialBehavior::ContinueAppFlow => Degradation::ReducedFunctionality,
            DenialBehavior::DisableFeature => Degradation::FeatureDisabled,
            DenialBehavior::ExitAppWithDialog => Degradation::ExitWithDialog,
            DenialBehavior::ExitAppImmediately => Degradation::ExitImmediately,
        }
    }
}

/// What to do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Not recoverable; surface it and degrade.
    Degrade(Degradation),
    /// Another request holds the surface; the caller must wait.
    Wait,
    /// The blocking request looks stuck; reclaim it once and go on.
    ReclaimStale(RequestId),
    /// Try again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Substitute defaults for a cosmetic configuration value.
    UseDefaults,
}

/// Maps errors to a [`Recovery`] and runs the shared retry budget.
///
/// The attempt counter is global to the manager and resets on the first
/// success.
#[derive(Debug)]
pub struct RecoveryManager {
    config: RecoveryConfig,
    attempts: AtomicU32,
}

impl RecoveryManager {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            attempts: AtomicU32::new(0),
        }
    }

    /// Decide how to handle `error` for a request whose caller chose
    /// `behavior`.
    pub fn handle(&self, error: &Error, behavior: DenialBehavior) -> Recovery {
        let degrade = Recovery::Degrade(behavior.into());
        match error {
            Error::NotDeclared { missing } => {
                error!(
                    missing = %capability::join(missing),
                    "capabilities not declared; declare them in the manifest"
                );
                degrade
            }
            Error::ConcurrentRequest { active, age, .. } => {
                if *age > self.config.stale_after() {
                    warn!(request_id = %active, age_ms = age.as_millis() as u64, "active request appears stuck");
                    Recovery::ReclaimStale(*active)
                } else {
                    debug!(request_id = %active, "request in progress, caller must wait");
                    Recovery::Wait
                }
            }
            Error::InvalidConfiguration(issue) => {
                if let Some(fix) = &issue.fix {
                    info!(field = %issue.field, "suggested fix: {fix}");
                }
                if issue.is_cosmetic() {
                    info!(field = %issue.field, "recovering with default configuration");
                    Recovery::UseDefaults
                } else {
                    error!(%issue, "invalid configuration");
                    degrade
                }
            }
            other => match other.host_error() {
                Some(host) if host.is_retryable() => match self.next_retry() {
                    Some((attempt, delay)) => Recovery::Retry { attempt, delay },
                    None => degrade,
                },
                _ => {
                    error!(error = %other, "unrecoverable failure");
                    degrade
                }
            },
        }
    }

    /// Claim the next retry attempt, or `None` when the budget is spent.
    ///
    /// Exhausting the budget resets the counter.
    pub fn next_retry(&self) -> Option<(u32, Duration)> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.config.max_attempts {
            warn!(max_attempts = self.config.max_attempts, "retry attempts exhausted");
            self.attempts.store(0, Ordering::SeqCst);
            return None;
        }
        let delay = self.backoff(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
        Some((attempt, delay))
    }

    pub fn record_success(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Exponential backoff for `attempt` (1-based), capped, plus jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_delay_ms);
        let jitter = (delay as f64 * self.config.jitter * rand::random::<f64>()) as u64;
        Duration::from_millis(delay + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfigIssue, RequestId};
    use capability::HostError;

    fn manager() -> RecoveryManager {
        RecoveryManager::new(RecoveryConfig::default())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let manager = RecoveryManager::new(RecoveryConfig {
            jitter: 0.0,
            ..RecoveryConfig::default()
        });
        let delays: Vec<u64> = (1..=5)
            .map(|a| manager.backoff(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 8000]);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let manager = manager();
        for _ in 0..100 {
            let delay = manager.backoff(2).as_millis();
            assert!((2000..=2200).contains(&delay), "{delay}");
        }
    }

    #[test]
    fn retry_budget_is_bounded_and_resets() {
        let manager = manager();
        let transient = Error::TransientHost {
            attempts: 1,
            source: HostError::Transient("busy".into()),
        };
        for expected in 1..=3 {
            match manager.handle(&transient, DenialBehavior::ContinueAppFlow) {
                Recovery::Retry { attempt, .. } => assert_eq!(attempt, expected),
                other => panic!("expected retry, got {other:?}"),
            }
        }
        assert_eq!(
            manager.handle(&transient, DenialBehavior::DisableFeature),
            Recovery::Degrade(Degradation::FeatureDisabled)
        );
        assert_eq!(manager.attempts(), 0);

        manager.next_retry();
        manager.record_success();
        assert_eq!(manager.attempts(), 0);
    }

    #[test]
    fn not_declared_is_never_retried() {
        let err = Error::NotDeclared {
            missing: vec!["sms".into()],
        };
        assert_eq!(
            manager().handle(&err, DenialBehavior::ExitAppImmediately),
            Recovery::Degrade(Degradation::ExitImmediately)
        );
    }

    #[test]
    fn unavailable_host_is_not_retried() {
        let err = Error::TransientHost {
            attempts: 1,
            source: HostError::Unavailable("gone".into()),
        };
        assert!(matches!(
            manager().handle(&err, DenialBehavior::ContinueAppFlow),
            Recovery::Degrade(_)
        ));
    }

    #[test]
    fn stale_conflicts_are_reclaimed() {
        let active = RequestId::new();
        let conflict = |age_ms| Error::ConcurrentRequest {
            surface: "main".into(),
            active,
            age: Duration::from_millis(age_ms),
        };
        assert_eq!(
            manager().handle(&conflict(1000), DenialBehavior::ContinueAppFlow),
            Recovery::Wait
        );
        assert_eq!(
            manager().handle(&conflict(30_001), DenialBehavior::ContinueAppFlow),
            Recovery::ReclaimStale(active)
        );
    }

    #[test]
    fn cosmetic_configuration_uses_defaults() {
        let cosmetic = Error::InvalidConfiguration(ConfigIssue::cosmetic("dialog_theme", "unknown"));
        let structural =
            Error::InvalidConfiguration(ConfigIssue::structural("gate.max_concurrent", "zero"));
        assert_eq!(
            manager().handle(&cosmetic, DenialBehavior::ContinueAppFlow),
            Recovery::UseDefaults
        );
        assert_eq!(
            manager().handle(&structural, DenialBehavior::ContinueAppFlow),
            Recovery::Degrade(Degradation::ReducedFunctionality)
        );
    }
}
