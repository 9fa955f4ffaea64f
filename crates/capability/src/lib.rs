//! Capability model and host-facing probes.
//!
//! Core principle: **a capability only reaches the host prompt after it has
//! been declared, classified, and routed.**
//!
//! # Overview
//!
//! - [`Capability`], [`CapabilityState`], [`CapabilityResult`]: the data model.
//! - [`Host`]: the host permission subsystem the engine consumes.
//! - [`DeclarationValidator`]: statically declared capabilities, cached per
//!   application identity.
//! - [`StateChecker`]: classifies the current grantedness of a capability.
//! - [`SpecialRouter`]: out-of-band flows for capabilities the standard
//!   runtime prompt cannot grant.
//! - [`ScriptedHost`]: an in-memory host driven by a TOML profile.

mod capability;
mod checker;
mod declaration;
mod error;
mod host;
mod router;
mod scripted;

pub use capability::{ApiLevel, Capability, CapabilityResult, CapabilityState, join, known};
pub use checker::StateChecker;
pub use declaration::{DeclarationSource, DeclarationValidator, Manifest};
pub use error::{Error, HostError, Result};
pub use host::{AppId, Host, HostAnswer, SurfaceId};
pub use router::{RoutingOutcome, SettingsTarget, SpecialRouter};
pub use scripted::{HostState, ScriptedHost};
