//! Step declarations.
//!
//! A declaration is the operator-authored definition of one step: its
//! address, its explicit dependency list, and the kind-specific fields the
//! runners need. The declaration's canonical bytes are one of the three
//! fingerprint inputs, so the serialized field order is fixed by this
//! struct and must stay stable.

use granary_core::{StepAddress, StepKind};
use serde::{Deserialize, Serialize};

/// The declared definition of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDeclaration {
    /// Globally unique step address.
    pub address: StepAddress,

    /// Addresses of the steps this one depends on.
    #[serde(default)]
    pub dependencies: Vec<StepAddress>,

    /// Private steps are excluded from planning unless explicitly included.
    #[serde(default)]
    pub private: bool,

    /// Upstream location for `snapshot` and `trigger` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Declared SHA-256 of the upstream payload, when the publisher pins one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Registered transform name for `data` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,

    /// Stable upsert identifier override for `publish` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl StepDeclaration {
    /// Create a declaration with no dependencies and no kind-specific fields.
    #[must_use]
    pub fn new(address: StepAddress) -> Self {
        Self {
            address,
            dependencies: Vec::new(),
            private: false,
            source: None,
            checksum: None,
            transform: None,
            key: None,
        }
    }

    /// Add a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dependency: StepAddress) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Set the upstream source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the declared upstream checksum.
    #[must_use]
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Set the transform name.
    #[must_use]
    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    /// Mark the step private.
    #[must_use]
    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    /// The step kind, taken from the address.
    #[must_use]
    pub fn kind(&self) -> StepKind {
        self.address.kind()
    }

    /// Canonical bytes of this declaration, used as fingerprint input.
    ///
    /// Serialization is JSON with the field order fixed by this struct;
    /// two identical declarations always produce identical bytes.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // Serialization of this struct cannot fail: all fields are plain
        // strings, bools, and addresses.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> StepAddress {
        StepAddress::parse(s).unwrap()
    }

    #[test]
    fn test_canonical_bytes_deterministic() {
        let decl = StepDeclaration::new(addr("data://garden/energy/2024/consumption"))
            .with_dependency(addr("snapshot://eia/2024/consumption"))
            .with_transform("harmonize");
        assert_eq!(decl.canonical_bytes(), decl.canonical_bytes());
    }

    #[test]
    fn test_canonical_bytes_sensitive_to_fields() {
        let base = StepDeclaration::new(addr("snapshot://eia/2024/consumption"))
            .with_source("https://example.org/consumption.csv");
        let changed = base.clone().with_checksum("deadbeef");
        assert_ne!(base.canonical_bytes(), changed.canonical_bytes());
    }

    #[test]
    fn test_deserialize_minimal() {
        let decl: StepDeclaration =
            serde_json::from_str(r#"{"address": "trigger://eia/hourly"}"#).unwrap();
        assert_eq!(decl.kind(), StepKind::Trigger);
        assert!(decl.dependencies.is_empty());
        assert!(!decl.private);
    }

    #[test]
    fn test_roundtrip() {
        let decl = StepDeclaration::new(addr("publish://grapher/energy/2024/consumption"))
            .with_dependency(addr("data://garden/energy/2024/consumption"))
            .private();
        let json = serde_json::to_string(&decl).unwrap();
        let back: StepDeclaration = serde_json::from_str(&json).unwrap();
        assert_eq!(decl, back);
    }
}
