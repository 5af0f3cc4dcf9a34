//! bento-engine: executes a declarative graph of composable tasks ("nodes")
//! with data-flow between them, templated parameter resolution, nested
//! control-flow (groups, loops, parallel fan-out), weighted progress
//! tracking, cooperative cancellation, and structured event reporting.
//!
//! A workflow definition (a "bento") is a tree of [`Definition`] nodes. The
//! node registry, leaf node implementations, persistence, secret store, and
//! logging sinks are external collaborators consumed through the traits in
//! [`registry`], [`secrets`], and [`messenger`] — this crate is the
//! orchestration core only.

pub mod cancel;
pub mod context;
pub mod definition;
pub mod error;
pub mod graph;
pub mod loop_engine;
pub mod messenger;
pub mod node;
pub mod observability;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod secrets;
pub mod template;

pub use cancel::CancellationToken;
pub use context::ExecutionContext;
pub use definition::{Definition, Edge, NodeKind};
pub use error::{BuildError, CycleError, EngineError, NodeError};
pub use messenger::{Messenger, NoopMessenger};
pub use orchestrator::{EngineOptions, Orchestrator, RunResult, RunStatus};
pub use progress::ProgressModel;
pub use registry::{LeafNode, NodeRegistry, OutputSink, RegistryError};
pub use secrets::{SecretsError, SecretsProvider};
