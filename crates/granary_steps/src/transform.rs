//! Transforms.
//!
//! The domain-specific curation logic inside a `data` step is opaque to
//! the engine. It lives behind the [`Transform`] trait and is looked up by
//! name in an explicit registry built once per invocation; there is no
//! runtime reflection or path-convention discovery.

use async_trait::async_trait;
use granary_catalog::{Dataset, DatasetMeta, EntryError, EntryRef, Provenance, Table};
use granary_core::StepAddress;
use granary_graph::StepDeclaration;
use indexmap::IndexMap;
use std::sync::Arc;

/// Errors raised by transforms. Whatever a transform reports is surfaced
/// verbatim to the operator alongside the failing step's address.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The transformation logic failed.
    #[error("{0}")]
    Failed(String),

    /// An input entry could not be read.
    #[error(transparent)]
    Entry(#[from] EntryError),
}

/// What a transform sees: its step's declaration and handles to the
/// resolved catalog entries of every declared dependency.
pub struct TransformContext<'a> {
    /// The declaration of the step being executed.
    pub declaration: &'a StepDeclaration,
    /// Resolved dependency entries, in declaration order.
    pub inputs: &'a IndexMap<StepAddress, EntryRef>,
}

impl TransformContext<'_> {
    /// Dataset metadata derived from the step address: name is the last
    /// path segment, version the one before it, stable id the full path.
    #[must_use]
    pub fn derived_meta(&self) -> DatasetMeta {
        let address = &self.declaration.address;
        let segments: Vec<&str> = address.segments().collect();
        let name = segments.last().copied().unwrap_or("dataset").to_string();
        let version = segments
            .len()
            .checked_sub(2)
            .and_then(|i| segments.get(i))
            .copied()
            .unwrap_or("latest")
            .to_string();
        DatasetMeta {
            name,
            version,
            stable_id: address.path().to_string(),
            provenance: Provenance {
                step: address.clone(),
                source: None,
                content_hash: None,
                probe: None,
                inputs: self.inputs.keys().cloned().collect(),
            },
        }
    }
}

/// A named data transformation.
#[async_trait]
pub trait Transform: Send + Sync {
    /// The registered name.
    fn name(&self) -> &str;

    /// Produce the step's dataset from its inputs.
    ///
    /// # Errors
    ///
    /// Returns `TransformError`; the engine reports it verbatim and marks
    /// the step failed.
    async fn apply(&self, ctx: &TransformContext<'_>) -> Result<Dataset, TransformError>;
}

/// Errors raised by the transform registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A transform with this name is already registered.
    #[error("Transform already registered: {name}")]
    AlreadyRegistered {
        /// The conflicting name.
        name: String,
    },

    /// No transform with this name.
    #[error("Unknown transform: {name}")]
    NotFound {
        /// The requested name.
        name: String,
    },
}

/// Registry of transforms, built once at invocation time.
#[derive(Default, Clone)]
pub struct TransformRegistry {
    transforms: IndexMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the builtin transforms pre-registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(Passthrough))
            .unwrap_or_else(|_| unreachable!("builtins registered into an empty registry"));
        registry
    }

    /// Register a transform under its own name.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRegistered` on a name collision.
    pub fn register(&mut self, transform: Arc<dyn Transform>) -> Result<(), RegistryError> {
        let name = transform.name().to_string();
        if self.transforms.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered { name });
        }
        self.transforms.insert(name, transform);
        Ok(())
    }

    /// Look up a transform by name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing is registered under the name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Transform>, RegistryError> {
        self.transforms
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    /// Registered names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.transforms.keys().map(String::as_str).collect()
    }
}

/// Builtin transform: carries every table of every input entry through
/// unchanged. Useful for steps that only re-shelve upstream data and as a
/// default in fixtures.
pub struct Passthrough;

#[async_trait]
impl Transform for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn apply(&self, ctx: &TransformContext<'_>) -> Result<Dataset, TransformError> {
        let mut tables: Vec<Table> = Vec::new();
        for entry in ctx.inputs.values() {
            for name in entry.table_names()? {
                tables.push(entry.table(&name)?);
            }
        }
        Ok(Dataset {
            meta: ctx.derived_meta(),
            tables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> StepAddress {
        StepAddress::parse(s).unwrap()
    }

    #[test]
    fn test_registry_register_get() {
        let registry = TransformRegistry::with_builtins();
        assert!(registry.get("passthrough").is_ok());
        assert!(matches!(
            registry.get("nope"),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = TransformRegistry::with_builtins();
        assert!(matches!(
            registry.register(Arc::new(Passthrough)),
            Err(RegistryError::AlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_derived_meta_from_address() {
        let decl = StepDeclaration::new(addr("data://garden/energy/2024/consumption"));
        let inputs = IndexMap::new();
        let ctx = TransformContext {
            declaration: &decl,
            inputs: &inputs,
        };
        let meta = ctx.derived_meta();
        assert_eq!(meta.name, "consumption");
        assert_eq!(meta.version, "2024");
        assert_eq!(meta.stable_id, "garden/energy/2024/consumption");
    }

    #[test]
    fn test_derived_meta_short_address() {
        let decl = StepDeclaration::new(addr("data://single"));
        let inputs = IndexMap::new();
        let ctx = TransformContext {
            declaration: &decl,
            inputs: &inputs,
        };
        let meta = ctx.derived_meta();
        assert_eq!(meta.name, "single");
        assert_eq!(meta.version, "latest");
    }

    #[tokio::test]
    async fn test_passthrough_empty_inputs() {
        let decl = StepDeclaration::new(addr("data://garden/x"));
        let inputs = IndexMap::new();
        let ctx = TransformContext {
            declaration: &decl,
            inputs: &inputs,
        };
        let dataset = Passthrough.apply(&ctx).await.unwrap();
        assert!(dataset.tables.is_empty());
        dataset.validate().unwrap();
    }
}
