//! Declared capabilities and their validation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{AppId, Capability, Error, Result};

/// Trait for the static list of capabilities an application declares.
pub trait DeclarationSource: Send + Sync {
    /// Read the declared capabilities of `app`.
    fn declared(&self, app: &AppId) -> Result<Vec<Capability>>;
}

/// A capability manifest loaded from TOML.
///
/// ```toml
/// app = "dev.grantly.demo"
/// declared = ["camera", "fine-location"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Application the declarations belong to.
    pub app: AppId,

    /// Declared capability identifiers.
    #[serde(default)]
    pub declared: Vec<Capability>,
}

impl Manifest {
    pub fn new(app: AppId, declared: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            app,
            declared: declared.into_iter().collect(),
        }
    }

    /// Load a manifest from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse a manifest from a TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))
    }
}

impl DeclarationSource for Manifest {
    fn declared(&self, app: &AppId) -> Result<Vec<Capability>> {
        if app != &self.app {
            return Err(Error::UnknownApplication(app.clone()));
        }
        Ok(self.declared.clone())
    }
}

/// Confirms requested capabilities were statically declared.
///
/// The declared set is read once per application identity and cached until
/// [`invalidate`](Self::invalidate) is called.
pub struct DeclarationValidator {
    app: AppId,
    source: Arc<dyn DeclarationSource>,
    cache: RwLock<HashMap<AppId, Arc<BTreeSet<Capability>>>>,
}

impl DeclarationValidator {
    pub fn new(app: AppId, source: Arc<dyn DeclarationSource>) -> Self {
        Self {
            app,
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The application this validator checks requests for.
    pub fn app(&self) -> &AppId {
        &self.app
    }

    /// Declared capabilities of `app`, read through the cache.
    pub fn declared_for(&self, app: &AppId) -> Result<Arc<BTreeSet<Capability>>> {
        if let Some(cached) = self.cache.read().get(app) {
            return Ok(Arc::clone(cached));
        }

        let declared: Arc<BTreeSet<Capability>> =
            Arc::new(self.source.declared(app)?.into_iter().collect());
        if declared.is_empty() {
            warn!(app = %app, "no capabilities declared");
        }
        debug!(app = %app, count = declared.len(), "cached declared capabilities");

        let mut cache = self.cache.write();
        let entry = cache.entry(app.clone()).or_insert(declared);
        Ok(Arc::clone(entry))
    }

    /// Declared capabilities of this validator's application.
    pub fn declared(&self) -> Result<Arc<BTreeSet<Capability>>> {
        self.declared_for(&self.app)
    }

    /// Whether `capability` is declared. Unreadable declarations count as
    /// undeclared.
    pub fn is_declared(&self, capability: &Capability) -> bool {
        match self.declared() {
            Ok(declared) => declared.contains(capability),
            Err(e) => {
                warn!(capability = %capability, error = %e, "declaration lookup failed");
                false
            }
        }
    }

    /// Fail unless every requested capability is declared.
    ///
    /// The error lists every missing capability once, in request order.
    pub fn validate(&self, requested: &[Capability]) -> Result<()> {
        let declared = self.declared()?;
        let mut seen = HashSet::new();
        let missing: Vec<Capability> = requested
            .iter()
            .filter(|c| !declared.contains(*c) && seen.insert(*c))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            warn!(missing = %crate::join(&missing), "undeclared capabilities requested");
            Err(Error::NotDeclared { missing })
        }
    }

    /// Drop the cached declarations of `app`.
    pub fn invalidate(&self, app: &AppId) {
        self.cache.write().remove(app);
    }

    /// Drop every cached declaration set.
    pub fn invalidate_all(&self) {
        self.cache.write().clear();
    }
}
