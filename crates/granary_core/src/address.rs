//! Step addresses.
//!
//! Every step in the build graph is identified by an address of the form
//! `kind://path/segments`. Addresses are globally unique and never change
//! across runs; ordering exists only so collections iterate deterministically.

use crate::error::{CoreError, CoreResult};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// The closed set of step kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// A raw external resource pinned into content-addressed storage.
    Snapshot,
    /// A transformation producing a catalog entry.
    Data,
    /// A remote freshness probe with no local output; exists to force
    /// downstream rebuilds.
    Trigger,
    /// Writes a data step's output into an external consuming system.
    Publish,
}

impl StepKind {
    /// All kinds, in address-grammar order.
    pub const ALL: [Self; 4] = [Self::Snapshot, Self::Data, Self::Trigger, Self::Publish];

    /// The scheme string used in addresses.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Data => "data",
            Self::Trigger => "trigger",
            Self::Publish => "publish",
        }
    }

    /// Parse a kind from its scheme string.
    ///
    /// # Errors
    ///
    /// Returns `MalformedAddress` if the string is not a known kind.
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "snapshot" => Ok(Self::Snapshot),
            "data" => Ok(Self::Data),
            "trigger" => Ok(Self::Trigger),
            "publish" => Ok(Self::Publish),
            other => Err(CoreError::MalformedAddress {
                input: other.to_string(),
                reason: "unknown step kind".to_string(),
            }),
        }
    }

    /// Whether this kind probes an upstream resource during freshness
    /// evaluation.
    #[must_use]
    pub const fn probes_upstream(&self) -> bool {
        matches!(self, Self::Snapshot | Self::Trigger)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed step address: a kind tag plus a slash-delimited location path.
///
/// The textual grammar is `kind://path/segments` where the path is a
/// non-empty sequence of non-empty segments (provider/release/name-like).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepAddress {
    kind: StepKind,
    path: String,
}

impl StepAddress {
    /// Parse a textual address.
    ///
    /// # Errors
    ///
    /// Returns `MalformedAddress` if the scheme separator is missing, the
    /// kind is unknown, or the path is empty or contains empty segments.
    pub fn parse(input: &str) -> CoreResult<Self> {
        let malformed = |reason: &str| CoreError::MalformedAddress {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, path) = input
            .split_once("://")
            .ok_or_else(|| malformed("missing `://` separator"))?;

        let kind = StepKind::parse(scheme).map_err(|_| malformed("unknown step kind"))?;

        if path.is_empty() {
            return Err(malformed("empty path"));
        }
        if path.split('/').any(str::is_empty) {
            return Err(malformed("empty path segment"));
        }
        if path.chars().any(char::is_whitespace) {
            return Err(malformed("whitespace in path"));
        }

        Ok(Self {
            kind,
            path: path.to_string(),
        })
    }

    /// Build an address from an already-validated kind and path.
    ///
    /// # Errors
    ///
    /// Returns `MalformedAddress` under the same rules as [`parse`].
    ///
    /// [`parse`]: Self::parse
    pub fn new(kind: StepKind, path: &str) -> CoreResult<Self> {
        Self::parse(&format!("{}://{}", kind.as_str(), path))
    }

    /// The step kind.
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        self.kind
    }

    /// The slash-delimited location path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path segments, in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/')
    }

    /// Whether this address matches a target pattern: either the exact
    /// address, or the pattern appears as a substring of the full address.
    #[must_use]
    pub fn matches(&self, pattern: &str) -> bool {
        let full = self.to_string();
        full == pattern || full.contains(pattern)
    }
}

impl fmt::Display for StepAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind.as_str(), self.path)
    }
}

impl std::str::FromStr for StepAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Addresses serialize as their textual form so they can be used as map keys
// in JSON documents (manifests, build records).
impl Serialize for StepAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StepAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_all_kinds() {
        for kind in StepKind::ALL {
            let addr = StepAddress::parse(&format!("{}://who/2024/gho", kind)).unwrap();
            assert_eq!(addr.kind(), kind);
            assert_eq!(addr.path(), "who/2024/gho");
        }
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let err = StepAddress::parse("garden://who/2024/gho").unwrap_err();
        assert!(matches!(err, CoreError::MalformedAddress { .. }));
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert!(StepAddress::parse("data:who/2024").is_err());
        assert!(StepAddress::parse("who/2024").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        assert!(StepAddress::parse("data://").is_err());
        assert!(StepAddress::parse("data:///who").is_err());
        assert!(StepAddress::parse("data://who//gho").is_err());
        assert!(StepAddress::parse("data://who/2024/").is_err());
        assert!(StepAddress::parse("data://who/2 024").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let addr = StepAddress::parse("snapshot://faostat/2023/crops").unwrap();
        let again = StepAddress::parse(&addr.to_string()).unwrap();
        assert_eq!(addr, again);
    }

    #[test]
    fn test_matches_exact_and_substring() {
        let addr = StepAddress::parse("data://garden/energy/2024/consumption").unwrap();
        assert!(addr.matches("data://garden/energy/2024/consumption"));
        assert!(addr.matches("energy"));
        assert!(addr.matches("garden/energy"));
        assert!(!addr.matches("minerals"));
    }

    #[test]
    fn test_segments() {
        let addr = StepAddress::parse("data://a/b/c").unwrap();
        let segs: Vec<_> = addr.segments().collect();
        assert_eq!(segs, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_serde_as_string() {
        let addr = StepAddress::parse("publish://grapher/energy/2024/consumption").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"publish://grapher/energy/2024/consumption\"");
        let back: StepAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
    }

    #[test]
    fn test_probes_upstream() {
        assert!(StepKind::Snapshot.probes_upstream());
        assert!(StepKind::Trigger.probes_upstream());
        assert!(!StepKind::Data.probes_upstream());
        assert!(!StepKind::Publish.probes_upstream());
    }

    proptest::proptest! {
        #[test]
        fn prop_parse_display_roundtrip(
            segments in proptest::collection::vec("[a-z0-9_]{1,12}", 1..5)
        ) {
            let path = segments.join("/");
            for kind in StepKind::ALL {
                let addr = StepAddress::new(kind, &path).unwrap();
                let again = StepAddress::parse(&addr.to_string()).unwrap();
                prop_assert_eq!(addr, again);
            }
        }
    }
}
