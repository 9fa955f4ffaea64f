//! In-memory lifecycle journal.

use std::collections::VecDeque;
use std::fmt;

use capability::{Capability, CapabilityResult, CapabilityState, SurfaceId, join};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::RequestId;

/// Default number of entries kept.
pub const DEFAULT_CAPACITY: usize = 1024;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalKind {
    Submitted {
        surface: SurfaceId,
        capabilities: Vec<Capability>,
        lazy: bool,
    },
    /// Results were delivered to the callback.
    Resolved {
        results: Vec<ResolvedCapability>,
    },
    /// The host was asked to prompt.
    Prompted { capabilities: Vec<Capability> },
    /// The host answered a prompt.
    Answered {
        granted: Vec<Capability>,
        refused: Vec<Capability>,
    },
    Cancelled,
    Expired,
    Rejected { reason: String },
    RetryScheduled { attempt: u32, delay_ms: u64 },
    Failed { error: String },
    LockoutTriggered { reason: String },
}

/// One capability's final state in a [`JournalKind::Resolved`] entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCapability {
    pub capability: Capability,
    pub state: CapabilityState,
}

impl JournalKind {
    pub fn resolved(results: &[CapabilityResult]) -> Self {
        JournalKind::Resolved {
            results: results
                .iter()
                .map(|r| ResolvedCapability {
                    capability: r.capability.clone(),
                    state: r.state,
                })
                .collect(),
        }
    }
}

/// An entry in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    /// `None` for engine-wide events such as lockouts.
    pub request_id: Option<RequestId>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: JournalKind,
}

impl JournalEntry {
    pub fn new(request_id: Option<RequestId>, kind: JournalKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            timestamp: Utc::now(),
            kind,
        }
    }
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.timestamp.format("%H:%M:%S%.3f"))?;
        if let Some(id) = self.request_id {
            let id = id.to_string();
            write!(f, "[{}] ", &id[..8])?;
        }
        match &self.kind {
            JournalKind::Submitted {
                surface,
                capabilities,
                lazy,
            } => {
                write!(f, "submitted from {surface}: {}", join(capabilities))?;
                if *lazy {
                    write!(f, " (lazy)")?;
                }
                Ok(())
            }
            JournalKind::Resolved { results } => {
                let parts: Vec<String> = results
                    .iter()
                    .map(|r| format!("{}={}", r.capability, r.state))
                    .collect();
                write!(f, "resolved: {}", parts.join(", "))
            }
            JournalKind::Prompted { capabilities } => {
                write!(f, "prompted: {}", join(capabilities))
            }
            JournalKind::Answered { granted, refused } => write!(
                f,
                "answered: granted [{}], refused [{}]",
                join(granted),
                join(refused)
            ),
            JournalKind::Cancelled => write!(f, "cancelled"),
            JournalKind::Expired => write!(f, "expired"),
            JournalKind::Rejected { reason } => write!(f, "rejected: {reason}"),
            JournalKind::RetryScheduled { attempt, delay_ms } => {
                write!(f, "retry {attempt} in {delay_ms}ms")
            }
            JournalKind::Failed { error } => write!(f, "failed: {error}"),
            JournalKind::LockoutTriggered { reason } => write!(f, "lockout: {reason}"),
        }
    }
}

/// A bounded, process-local log of request lifecycle events.
///
/// The oldest entries are dropped once the capacity is reached.
#[derive(Debug)]
pub struct Journal {
    capacity: usize,
    entries: Mutex<VecDeque<JournalEntry>>,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, request_id: Option<RequestId>, kind: JournalKind) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(JournalEntry::new(request_id, kind));
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Entries of one request, oldest first.
    pub fn for_request(&self, id: RequestId) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.request_id == Some(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Serialize every entry as one JSON object per line.
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for entry in self.entries.lock().iter() {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_is_bounded() {
        let journal = Journal::new(2);
        let id = RequestId::new();
        journal.record(Some(id), JournalKind::Cancelled);
        journal.record(Some(id), JournalKind::Expired);
        journal.record(None, JournalKind::LockoutTriggered {
            reason: "integrity".into(),
        });

        let kinds: Vec<JournalKind> = journal.entries().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                JournalKind::Expired,
                JournalKind::LockoutTriggered {
                    reason: "integrity".into()
                }
            ]
        );
        assert_eq!(journal.for_request(id).len(), 1);
    }

    #[test]
    fn entries_serialize_tagged() {
        let journal = Journal::default();
        journal.record(
            Some(RequestId::new()),
            JournalKind::Prompted {
                capabilities: vec!["camera".into()],
            },
        );
        let line = journal.to_json_lines().unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["kind"], "prompted");
        assert_eq!(value["capabilities"][0], "camera");
    }

    #[test]
    fn resolved_entries_display_states() {
        let results = vec![
            CapabilityResult::granted("camera".into()),
            CapabilityResult::denied("microphone".into(), true),
        ];
        let entry = JournalEntry::new(None, JournalKind::resolved(&results));
        assert!(
            entry
                .to_string()
                .ends_with("resolved: camera=granted, microphone=denied")
        );
    }
}
