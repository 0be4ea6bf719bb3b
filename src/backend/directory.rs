//! Directory-binding property source.
//!
//! Resolves a name through a pre-configured [`NamingContext`] and reads the
//! bound object as a key/value aggregate. The binding is a single opaque
//! object, not row-addressable storage, so this backend is read-only.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Change, PropertyBackend, Properties, properties};
use crate::error::{Error, Result};

/// Object bound under a name in a naming context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundObject {
    /// A key/value aggregate.
    Map(Properties),
    /// Properties-format text, parsed on lookup.
    Properties(String),
    /// A plain string value.
    Text(String),
    /// Any other object, described by its type name.
    Opaque(String),
}

impl BoundObject {
    fn shape(&self) -> String {
        match self {
            Self::Map(_) => "map".to_string(),
            Self::Properties(_) => "properties".to_string(),
            Self::Text(_) => "text".to_string(),
            Self::Opaque(type_name) => type_name.clone(),
        }
    }
}

/// Failure reported by a naming context lookup.
#[derive(Debug, thiserror::Error)]
pub enum NamingError {
    /// Nothing is bound under the name.
    #[error("name '{0}' is not bound")]
    NotBound(String),
    /// The naming service itself could not be reached.
    #[error("naming service unavailable: {0}")]
    Unavailable(String),
}

/// A resolver from names to bound objects.
///
/// The context is owned by the caller; backends only perform lookups.
pub trait NamingContext: Send + Sync + 'static {
    /// Resolves `name` to the object bound under it.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError`] if the name is not bound or the service fails.
    fn lookup(&self, name: &str) -> std::result::Result<BoundObject, NamingError>;
}

/// Process-local naming context.
///
/// Bindings can be replaced at any time; stores bound to a name observe the
/// new object on their next reload.
#[derive(Debug, Default)]
pub struct InMemoryContext {
    bindings: RwLock<HashMap<String, BoundObject>>,
}

impl InMemoryContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `object` under `name`, failing if the name is taken.
    ///
    /// Returns `false` if something was already bound.
    pub fn bind(&self, name: impl Into<String>, object: BoundObject) -> bool {
        let mut bindings = self.bindings.write();
        let name = name.into();
        if bindings.contains_key(&name) {
            return false;
        }
        bindings.insert(name, object);
        true
    }

    /// Binds `object` under `name`, replacing any previous binding.
    pub fn rebind(&self, name: impl Into<String>, object: BoundObject) {
        self.bindings.write().insert(name.into(), object);
    }

    /// Removes the binding for `name`. Returns true if it existed.
    pub fn unbind(&self, name: &str) -> bool {
        self.bindings.write().remove(name).is_some()
    }
}

impl NamingContext for InMemoryContext {
    fn lookup(&self, name: &str) -> std::result::Result<BoundObject, NamingError> {
        self.bindings
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| NamingError::NotBound(name.to_string()))
    }
}

/// Read-only backend over a directory binding.
#[derive(Clone)]
pub struct DirectoryBackend {
    context: Arc<dyn NamingContext>,
    name: String,
}

impl std::fmt::Debug for DirectoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryBackend")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DirectoryBackend {
    /// Creates a backend reading the object bound under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `name` is empty.
    pub fn new(context: Arc<dyn NamingContext>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::configuration(
                "a non-empty binding name is required for directory sources",
            ));
        }
        Ok(Self { context, name })
    }

    /// The binding name this backend resolves.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PropertyBackend for DirectoryBackend {
    fn kind(&self) -> &'static str {
        "directory"
    }

    fn location(&self) -> String {
        self.name.clone()
    }

    fn load_all(&self) -> Result<Properties> {
        let object = self
            .context
            .lookup(&self.name)
            .map_err(|e| Error::source_unavailable(self.location(), e))?;

        match object {
            BoundObject::Map(entries) => Ok(entries),
            BoundObject::Properties(text) => properties::parse(&text)
                .map_err(|_| Error::invalid_source_format(&self.name, "malformed properties")),
            other => Err(Error::invalid_source_format(&self.name, other.shape())),
        }
    }

    fn apply_change(&self, _change: Change<'_>) -> Result<()> {
        Err(Error::unsupported(self.kind(), "writing properties"))
    }
}
