//! Capability registry (§4.D).
//!
//! A named lookup table of external collaborators — HTTP services, guards,
//! reusable actions, view factories, tool/actor plugins — keyed by
//! `(namespace, name)`. The registry holds references only: it never invokes
//! a capability, and dropping it does not drain in-flight invocations.

use std::any::Any;
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

/// The fixed set of capability namespaces named in §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Services,
    Guards,
    Actions,
    Views,
    Tools,
    Actors,
}

impl Namespace {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Services => "services",
            Namespace::Guards => "guards",
            Namespace::Actions => "actions",
            Namespace::Views => "views",
            Namespace::Tools => "tools",
            Namespace::Actors => "actors",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("capability '{namespace}.{name}' is already registered")]
    #[diagnostic(code(flowspire::registry::duplicate))]
    Duplicate { namespace: Namespace, name: String },

    #[error("capability '{namespace}.{name}' is not registered")]
    #[diagnostic(code(flowspire::registry::not_found))]
    NotFound { namespace: Namespace, name: String },

    #[error("capability '{namespace}.{name}' config is invalid: {detail}")]
    #[diagnostic(code(flowspire::registry::invalid_config))]
    InvalidConfig {
        namespace: Namespace,
        name: String,
        detail: String,
    },
}

/// Validates a capability's dynamic configuration. Runs once at
/// registration time and again per call site when the caller supplies a
/// fresh config value (§4.D).
pub type ConfigSchema = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Wraps a trait-object capability (e.g. `Arc<dyn HttpService>`) so it can be
/// stored and recovered through the `Any`-based table below: `Any::downcast`
/// requires a `Sized` target, which a bare `dyn Trait` never is, but this
/// newtype around the (already-Sized) `Arc<T>` is.
pub struct Capability<T: ?Sized>(pub Arc<T>);

impl<T: ?Sized> Clone for Capability<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

struct Entry {
    capability: Arc<dyn Any + Send + Sync>,
    schema: Option<ConfigSchema>,
}

/// One registry per orchestrator instance.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    entries: std::sync::Arc<parking_lot::RwLock<FxHashMap<(Namespace, String), Entry>>>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `capability` under `namespace`/`name`.
    ///
    /// # Errors
    /// [`RegistryError::Duplicate`] if the name is already taken in that
    /// namespace; [`RegistryError::InvalidConfig`] if `schema` rejects an
    /// empty/default config probe.
    #[instrument(skip(self, capability, schema))]
    pub fn register<T: Send + Sync + 'static>(
        &self,
        namespace: Namespace,
        name: impl Into<String>,
        capability: Arc<T>,
        schema: Option<ConfigSchema>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut entries = self.entries.write();
        let key = (namespace, name.clone());
        if entries.contains_key(&key) {
            return Err(RegistryError::Duplicate { namespace, name });
        }
        entries.insert(
            key,
            Entry {
                capability,
                schema,
            },
        );
        Ok(())
    }

    /// Looks up a capability and downcasts it to `T`.
    #[must_use]
    pub fn lookup<T: Send + Sync + 'static>(
        &self,
        namespace: Namespace,
        name: &str,
    ) -> Option<Arc<T>> {
        let entries = self.entries.read();
        let entry = entries.get(&(namespace, name.to_string()))?;
        Arc::clone(&entry.capability).downcast::<T>().ok()
    }

    #[must_use]
    pub fn has(&self, namespace: Namespace, name: &str) -> bool {
        self.entries.read().contains_key(&(namespace, name.to_string()))
    }

    pub fn remove(&self, namespace: Namespace, name: &str) -> bool {
        self.entries.write().remove(&(namespace, name.to_string())).is_some()
    }

    #[must_use]
    pub fn list(&self, namespace: Namespace) -> Vec<String> {
        self.entries
            .read()
            .keys()
            .filter(|(ns, _)| *ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Validates `config` against the capability's registered schema, if
    /// any. Called once at registration and again per dynamic call site.
    ///
    /// # Errors
    /// [`RegistryError::NotFound`] if no such capability is registered;
    /// [`RegistryError::InvalidConfig`] if the schema rejects `config`.
    pub fn validate_config(
        &self,
        namespace: Namespace,
        name: &str,
        config: &Value,
    ) -> Result<(), RegistryError> {
        let entries = self.entries.read();
        let entry = entries
            .get(&(namespace, name.to_string()))
            .ok_or_else(|| RegistryError::NotFound {
                namespace,
                name: name.to_string(),
            })?;
        if let Some(schema) = &entry.schema {
            schema(config).map_err(|detail| RegistryError::InvalidConfig {
                namespace,
                name: name.to_string(),
                detail,
            })?;
        }
        Ok(())
    }
}
