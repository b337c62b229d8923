//! GRANARY Graph
//!
//! Step declarations and the validated dependency graph: an explicit
//! registry built once from declared definitions, cycle and dangling
//! reference detection, and target selection for the CLI layer.
//! Loading never touches the catalog.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod declaration;
pub mod graph;
pub mod loader;
pub mod select;

pub use declaration::StepDeclaration;
pub use graph::StepGraph;
pub use loader::{GraphError, GraphLoader};
pub use select::{SelectError, Selection};
