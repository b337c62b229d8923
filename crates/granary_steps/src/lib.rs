//! GRANARY Step Runners
//!
//! One execution strategy per step kind behind a common contract, plus the
//! pluggable seams the runners need: upstream remotes (fetch + probe),
//! transforms, and external upsert sinks. The scheduler stays kind-agnostic;
//! `RunnerSet::runner_for` is the single dispatch point.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod data;
pub mod publish;
pub mod remote;
pub mod runner;
pub mod sink;
pub mod snapshot;
pub mod transform;
pub mod trigger;

pub use data::DataRunner;
pub use publish::PublishRunner;
pub use remote::{FsRemote, Remote, RemoteError, StaticRemote};
pub use runner::{ExecutionContext, RunnerError, RunnerOutput, RunnerSet, StepRunner};
pub use sink::{DirSink, MemorySink, SinkError, UpsertSink};
pub use snapshot::SnapshotRunner;
pub use transform::{Passthrough, Transform, TransformContext, TransformError, TransformRegistry};
pub use trigger::TriggerRunner;
