//! Isolation and concurrency gate.
//!
//! Every request that is about to reach the host passes through the gate
//! first. It is the only global circuit breaker in the engine.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use capability::{AppId, Capability, DeclarationValidator, Host, known};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{GateConfig, RequestId};

/// Why the gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("in recovery lockout for another {}ms", .remaining.as_millis())]
    Lockout { remaining: Duration },

    #[error("rate limited, retry in {}ms", .wait.as_millis())]
    RateLimited { wait: Duration },

    #[error("no capabilities")]
    Empty,

    #[error("malformed capability '{capability}': {reason}")]
    Malformed {
        capability: String,
        reason: &'static str,
    },

    #[error("duplicate capability '{0}'")]
    Duplicate(Capability),

    #[error("capabilities not declared: {}", capability::join(.0))]
    NotDeclared(Vec<Capability>),

    #[error("declarations unavailable: {0}")]
    DeclarationsUnavailable(String),

    #[error("{in_flight} requests in flight (limit {limit})")]
    TooManyInFlight { in_flight: usize, limit: usize },
}

/// A point-in-time view of the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateStatus {
    pub app: AppId,
    pub in_flight: usize,
    pub in_lockout: bool,
    /// Time since the last recorded host call, if any.
    pub since_last_call: Option<Duration>,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "app: {}, in flight: {}, lockout: {}",
            self.app, self.in_flight, self.in_lockout
        )?;
        match self.since_last_call {
            Some(elapsed) => write!(f, ", last call: {}ms ago", elapsed.as_millis()),
            None => write!(f, ", last call: never"),
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    in_flight: HashMap<RequestId, Instant>,
    last_call: Option<Instant>,
    lockout_since: Option<Instant>,
}

/// Rate limit, shape validation, and concurrency ceiling for host calls.
pub struct IsolationGate {
    app: AppId,
    config: GateConfig,
    host: Arc<dyn Host>,
    declarations: Arc<DeclarationValidator>,
    state: Mutex<GateState>,
}

impl IsolationGate {
    pub fn new(
        app: AppId,
        config: GateConfig,
        host: Arc<dyn Host>,
        declarations: Arc<DeclarationValidator>,
    ) -> Self {
        debug!(app = %app, "isolation gate ready");
        Self {
            app,
            config,
            host,
            declarations,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Run every admission check in order, stopping at the first failure.
    pub fn check(&self, capabilities: &[Capability]) -> Result<(), Rejection> {
        let now = Instant::now();
        {
            let mut state = self.state.lock();

            if let Some(since) = state.lockout_since {
                let elapsed = now.saturating_duration_since(since);
                if elapsed < self.config.lockout() {
                    return Err(Rejection::Lockout {
                        remaining: self.config.lockout() - elapsed,
                    });
                }
                state.lockout_since = None;
                info!("recovery lockout cleared");
            }

            if let Some(last) = state.last_call {
                let elapsed = now.saturating_duration_since(last);
                let interval = self.config.min_request_interval();
                if elapsed < interval {
                    return Err(Rejection::RateLimited {
                        wait: interval - elapsed,
                    });
                }
            }
        }

        self.check_shape(capabilities)?;

        match self.declarations.validate(capabilities) {
            Ok(()) => {}
            Err(capability::Error::NotDeclared { missing }) => {
                return Err(Rejection::NotDeclared(missing));
            }
            Err(e) => return Err(Rejection::DeclarationsUnavailable(e.to_string())),
        }

        let mut state = self.state.lock();
        Self::purge(&mut state, now, self.config.request_timeout());
        if state.in_flight.len() >= self.config.max_concurrent {
            return Err(Rejection::TooManyInFlight {
                in_flight: state.in_flight.len(),
                limit: self.config.max_concurrent,
            });
        }
        Ok(())
    }

    /// Whether a request for `capabilities` may proceed.
    pub fn admit(&self, capabilities: &[Capability]) -> bool {
        match self.check(capabilities) {
            Ok(()) => true,
            Err(rejection) => {
                warn!(%rejection, "request not admitted");
                false
            }
        }
    }

    fn check_shape(&self, capabilities: &[Capability]) -> Result<(), Rejection> {
        if capabilities.is_empty() {
            return Err(Rejection::Empty);
        }
        let mut seen = HashSet::new();
        for capability in capabilities {
            let id = capability.as_str();
            let reason = if id.trim().is_empty() {
                Some("empty")
            } else if id.len() > self.config.max_capability_len {
                Some("too long")
            } else if id.contains("..") || id.contains(['/', '\\']) {
                Some("path-like")
            } else if id.contains(['*', '?']) {
                Some("wildcard")
            } else if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
                Some("whitespace or control character")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(Rejection::Malformed {
                    capability: id.to_string(),
                    reason,
                });
            }
            if !seen.insert(id) {
                return Err(Rejection::Duplicate(capability.clone()));
            }
        }
        Ok(())
    }

    /// Track `id` as in flight and stamp the rate limiter.
    pub fn record_start(&self, id: RequestId, capabilities: &[Capability]) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.in_flight.insert(id, now);
        state.last_call = Some(now);
        debug!(request_id = %id, count = capabilities.len(), "request started");
        Self::purge(&mut state, now, self.config.request_timeout());
    }

    /// Stop tracking `id`. Returns how long it was in flight.
    pub fn record_complete(&self, id: RequestId) -> Option<Duration> {
        let started = self.state.lock().in_flight.remove(&id)?;
        let duration = started.elapsed();
        debug!(request_id = %id, duration_ms = duration.as_millis() as u64, "request completed");
        Some(duration)
    }

    /// Purge in-flight entries older than the request timeout.
    pub fn sweep(&self) -> Vec<RequestId> {
        let mut state = self.state.lock();
        Self::purge(&mut state, Instant::now(), self.config.request_timeout())
    }

    fn purge(state: &mut GateState, now: Instant, timeout: Duration) -> Vec<RequestId> {
        let stale: Vec<RequestId> = state
            .in_flight
            .iter()
            .filter(|(_, started)| now.saturating_duration_since(**started) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            state.in_flight.remove(id);
            debug!(request_id = %id, "purged stale in-flight request");
        }
        stale
    }

    /// Enter recovery lockout and forget every in-flight request.
    pub fn trigger_lockout(&self, reason: &str) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.lockout_since = Some(now);
        state.last_call = Some(now);
        state.in_flight.clear();
        warn!(reason, lockout_ms = self.config.lockout_ms, "recovery lockout triggered");
    }

    /// Whether a lockout is in effect. Clears an elapsed lockout.
    pub fn in_lockout(&self) -> bool {
        self.lockout_remaining().is_some()
    }

    /// Time left in the current lockout. Clears an elapsed lockout.
    pub fn lockout_remaining(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        let since = state.lockout_since?;
        let elapsed = since.elapsed();
        if elapsed < self.config.lockout() {
            Some(self.config.lockout() - elapsed)
        } else {
            state.lockout_since = None;
            None
        }
    }

    /// Read back the host's view of our identity and make one baseline
    /// query.
    pub fn integrity_check(&self) -> bool {
        match self.host.app_id() {
            Ok(own) if own == self.app => {}
            Ok(own) => {
                error!(expected = %self.app, reported = %own, "integrity check failed: identity mismatch");
                return false;
            }
            Err(e) => {
                error!(error = %e, "integrity check failed: identity unavailable");
                return false;
            }
        }
        if let Err(e) = self.host.query_grant_state(&known::CAMERA.into()) {
            error!(error = %e, "integrity check failed: host not answering");
            return false;
        }
        debug!("integrity check passed");
        true
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn status(&self) -> GateStatus {
        let in_lockout = self.in_lockout();
        let state = self.state.lock();
        GateStatus {
            app: self.app.clone(),
            in_flight: state.in_flight.len(),
            in_lockout,
            since_last_call: state.last_call.map(|t| t.elapsed()),
        }
    }
}
