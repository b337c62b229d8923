//! Content hashes and step fingerprints.
//!
//! Uses BLAKE3 for all hashing operations. A [`Fingerprint`] summarizes
//! everything that could affect a step's output: the step's own declaration
//! bytes, the fingerprints of all its dependencies, and (for steps that
//! watch an upstream resource) the latest probe token. Fingerprint
//! computation is a pure function of those inputs; it never looks at the
//! clock or the host machine.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A BLAKE3 hash (256 bits / 32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The number of bytes in a hash.
    pub const LEN: usize = 32;

    /// Compute the BLAKE3 hash of data.
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// The all-zero hash.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Create from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get as raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Render as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid hex or not 32 bytes.
    pub fn from_hex(hex_str: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(hex_str).map_err(|_| HashError::InvalidHex)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Check that `data` hashes to this value.
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// Hashes serialize as hex strings: build records and metadata documents are
// JSON, and raw byte arrays are unreadable there.
impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Hash-related errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Invalid hex encoding.
    InvalidHex,
    /// Invalid length (not 32 bytes).
    InvalidLength(usize),
}

impl std::error::Error for HashError {}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHex => write!(f, "Invalid hex encoding"),
            Self::InvalidLength(len) => write!(f, "Invalid hash length: {} (expected 32)", len),
        }
    }
}

/// The result of probing an upstream resource: an opaque token (ETag,
/// commit hash, content checksum) that changes when the resource changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeToken(String);

impl ProbeToken {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProbeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A step fingerprint: an opaque digest of everything that could affect the
/// step's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(Hash);

/// Domain separator so fingerprint inputs cannot collide across positions
/// or with plain content hashes.
const FINGERPRINT_DOMAIN: &[u8] = b"granary.fingerprint.v1";

impl Fingerprint {
    /// Compose a fingerprint from a step's declaration bytes, its
    /// dependencies' fingerprints, and an optional upstream probe token.
    ///
    /// Dependency fingerprints are sorted before hashing so the result is
    /// independent of declaration order. Every field is length-prefixed.
    #[must_use]
    pub fn compose(
        declaration: &[u8],
        dependencies: &[Fingerprint],
        probe: Option<&ProbeToken>,
    ) -> Self {
        let mut deps: Vec<&Fingerprint> = dependencies.iter().collect();
        deps.sort();

        let mut hasher = blake3::Hasher::new();
        hasher.update(FINGERPRINT_DOMAIN);
        hasher.update(&(declaration.len() as u64).to_le_bytes());
        hasher.update(declaration);
        hasher.update(&(deps.len() as u64).to_le_bytes());
        for dep in deps {
            hasher.update(dep.0.as_bytes());
        }
        match probe {
            Some(token) => {
                let bytes = token.as_str().as_bytes();
                hasher.update(&[1u8]);
                hasher.update(&(bytes.len() as u64).to_le_bytes());
                hasher.update(bytes);
            }
            None => {
                hasher.update(&[0u8]);
            }
        }
        Self(Hash::from_bytes(*hasher.finalize().as_bytes()))
    }

    /// The underlying hash.
    #[must_use]
    pub const fn hash(&self) -> Hash {
        self.0
    }

    /// Render as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Parse from a hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 32-byte hex hash.
    pub fn from_hex(hex_str: &str) -> Result<Self, HashError> {
        Hash::from_hex(hex_str).map(Self)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content address for payload files in the catalog: the file name is the
/// BLAKE3 hash of the file's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentAddress(Hash);

impl ContentAddress {
    /// Address for the given payload bytes.
    #[must_use]
    pub fn from_data(data: &[u8]) -> Self {
        Self(Hash::compute(data))
    }

    /// The underlying hash.
    #[must_use]
    pub const fn hash(&self) -> Hash {
        self.0
    }

    /// The file name used for this payload in an entry directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.0.to_hex()
    }

    /// Check that `data` belongs at this address.
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        self.0.verify(data)
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blake3:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hash_compute() {
        let hash = Hash::compute(b"hello world");
        assert_eq!(hash.to_hex().len(), 64);
        assert!(hash.verify(b"hello world"));
        assert!(!hash.verify(b"hello there"));
    }

    #[test]
    fn test_hash_hex_roundtrip() {
        let hash = Hash::compute(b"test");
        let restored = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, restored);
    }

    #[test]
    fn test_hash_from_hex_rejects_bad_input() {
        assert_eq!(Hash::from_hex("zz"), Err(HashError::InvalidHex));
        assert_eq!(Hash::from_hex("abcd"), Err(HashError::InvalidLength(2)));
    }

    #[test]
    fn test_hash_serde_as_hex() {
        let hash = Hash::compute(b"x");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let dep = Fingerprint::compose(b"dep", &[], None);
        let a = Fingerprint::compose(b"decl", &[dep], None);
        let b = Fingerprint::compose(b"decl", &[dep], None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_order_independent_deps() {
        let d1 = Fingerprint::compose(b"one", &[], None);
        let d2 = Fingerprint::compose(b"two", &[], None);
        let a = Fingerprint::compose(b"decl", &[d1, d2], None);
        let b = Fingerprint::compose(b"decl", &[d2, d1], None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_sensitive_to_each_input() {
        let dep = Fingerprint::compose(b"dep", &[], None);
        let base = Fingerprint::compose(b"decl", &[dep], None);

        assert_ne!(base, Fingerprint::compose(b"decl2", &[dep], None));
        assert_ne!(base, Fingerprint::compose(b"decl", &[], None));
        assert_ne!(
            base,
            Fingerprint::compose(b"decl", &[dep], Some(&ProbeToken::new("etag-1")))
        );
    }

    #[test]
    fn test_fingerprint_probe_sensitivity() {
        let a = Fingerprint::compose(b"decl", &[], Some(&ProbeToken::new("etag-1")));
        let b = Fingerprint::compose(b"decl", &[], Some(&ProbeToken::new("etag-2")));
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_no_probe_differs_from_empty_probe() {
        let none = Fingerprint::compose(b"decl", &[], None);
        let empty = Fingerprint::compose(b"decl", &[], Some(&ProbeToken::new("")));
        assert_ne!(none, empty);
    }

    #[test]
    fn test_content_address() {
        let addr = ContentAddress::from_data(b"payload");
        assert!(addr.verify(b"payload"));
        assert!(!addr.verify(b"other"));
        assert_eq!(addr.file_name().len(), 64);
        assert!(addr.to_string().starts_with("blake3:"));
    }

    proptest::proptest! {
        #[test]
        fn prop_fingerprint_deterministic(decl: Vec<u8>, probe in proptest::option::of(".{0,32}")) {
            let token = probe.map(ProbeToken::new);
            let a = Fingerprint::compose(&decl, &[], token.as_ref());
            let b = Fingerprint::compose(&decl, &[], token.as_ref());
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_hash_hex_roundtrip(data: Vec<u8>) {
            let hash = Hash::compute(&data);
            prop_assert_eq!(Hash::from_hex(&hash.to_hex()).unwrap(), hash);
        }
    }
}
