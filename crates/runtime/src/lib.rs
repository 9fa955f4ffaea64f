//! Grantly runtime: request orchestration for capability grants.
//!
//! This crate turns a caller's "I need these capabilities" into at most one
//! tracked host prompt per surface, and reports the outcome through a
//! callback.
//!
//! # Overview
//!
//! The runtime is organized around these concepts:
//!
//! - **Orchestrator**: the per-request state machine. Validates
//!   declarations, classifies current state, routes special capabilities,
//!   admits through the isolation gate, prompts, and aggregates results.
//! - **IsolationGate**: rate limit, shape validation, concurrency ceiling
//!   and recovery lockout around every host prompt.
//! - **RecoveryManager**: classifies failures into retry, wait, reclaim or
//!   degrade.
//! - **EventLoop**: owns the orchestrator; every request transition happens
//!   on its task.
//! - **Grantly**: wires the above together from a [`GrantlyConfig`].
//!
//! # Example
//!
//! ```ignore
//! use runtime::{Grantly, GrantlyConfig, ui::UiProviders};
//!
//! # async fn example(host: Arc<dyn Host>, manifest: Arc<Manifest>) -> runtime::Result<()> {
//! let grantly = Grantly::init(GrantlyConfig::default(), host, manifest, UiProviders::default())?;
//! let request = grantly
//!     .request("main")
//!     .capabilities(["camera"])
//!     .callback(|results: &[CapabilityResult]| println!("{results:?}"));
//! let submitted = grantly.execute(request).await?;
//! println!("{}", submitted.id);
//! # Ok(())
//! # }
//! ```

mod callback;
mod config;
mod context;
mod error;
mod event_loop;
mod gate;
mod history;
mod journal;
mod orchestrator;
mod recovery;
mod request;
pub mod ui;

// Configuration
pub use config::{DenialBehavior, GateConfig, GrantlyConfig, RecoveryConfig, RequestsConfig};

// Error types
pub use error::{ConfigIssue, Error, IssueKind, Result};

// Requests and results
pub use callback::{RequestCallback, ResultGroups};
pub use request::{RequestBuilder, RequestDescriptor, RequestId, RequestState, Submitted};

// Components
pub use gate::{GateStatus, IsolationGate, Rejection};
pub use history::PromptHistory;
pub use journal::{Journal, JournalEntry, JournalKind, ResolvedCapability};
pub use orchestrator::Orchestrator;
pub use recovery::{Degradation, Recovery, RecoveryManager};

// Engine
pub use context::Grantly;
pub use event_loop::{EngineHandle, EventLoop};
