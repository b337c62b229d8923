//! GRANARY Catalog
//!
//! The addressable on-disk catalog: one directory per step address holding
//! a metadata document, table files in two interchangeable serialization
//! formats, and the step's build record. The publisher installs entries
//! with a single atomic rename so an entry's content and its recorded
//! fingerprint can never disagree.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod entry;
pub mod layout;
pub mod publisher;
pub mod records;

pub use codec::CodecError;
pub use entry::{Dataset, DatasetMeta, EntryError, EntryRef, Provenance, Table};
pub use layout::entry_dir;
pub use publisher::{CommitError, Publisher, StagedEntry};
pub use records::{BuildRecord, BuildRecordStore, RecordError};
