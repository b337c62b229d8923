//! Catalog directory layout.
//!
//! The catalog root contains one subtree per step kind, mirroring step
//! addresses: `data://garden/energy/2024` lives at
//! `<root>/data/garden/energy/2024`. Staging happens under `<root>/.staging`
//! and is swept when the publisher opens.

use granary_core::StepAddress;
use std::path::{Path, PathBuf};

/// Metadata document file name inside an entry directory.
pub const META_FILE: &str = "dataset.json";

/// Build record file name inside an entry directory.
pub const RECORD_FILE: &str = "_record.json";

/// Subdirectory for content-addressed payload files (snapshots).
pub const PAYLOAD_DIR: &str = "data";

/// Staging area under the catalog root.
pub const STAGING_DIR: &str = ".staging";

/// The canonical directory for a step's catalog entry.
#[must_use]
pub fn entry_dir(root: &Path, address: &StepAddress) -> PathBuf {
    let mut dir = root.join(address.kind().as_str());
    for segment in address.segments() {
        dir.push(segment);
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_dir_mirrors_address() {
        let addr = StepAddress::parse("data://garden/energy/2024").unwrap();
        let dir = entry_dir(Path::new("/catalog"), &addr);
        assert_eq!(dir, PathBuf::from("/catalog/data/garden/energy/2024"));
    }

    #[test]
    fn test_entry_dir_separates_kinds() {
        let data = StepAddress::parse("data://x/y").unwrap();
        let snap = StepAddress::parse("snapshot://x/y").unwrap();
        let root = Path::new("/catalog");
        assert_ne!(entry_dir(root, &data), entry_dir(root, &snap));
    }
}
