//! Error taxonomy. `NodeError` is the structured per-node failure;
//! `BuildError`/`CycleError` are graph-construction failures;
//! `CancellationError` is the only error that always wins. Template
//! resolution failures are a soft failure handled separately (logged via
//! `tracing`, not raised as an `EngineError` variant).

use thiserror::Error;

/// Malformed container graph: unknown edge endpoint or duplicate node id.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("duplicate node id '{0}' in container")]
    DuplicateId(String),
    #[error("edge endpoint '{0}' not found")]
    UnknownEdgeEndpoint(String),
}

/// A cycle was detected within a group's child graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("circular dependency detected at node '{0}'")]
pub struct CycleError(pub String);

/// The cancellation token was signalled before or during an operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("context canceled")]
pub struct CancellationError;

/// Structured failure at a named node. `operation` is one of
/// `"get neta"`, `"execute"`, `"validate"`, `"build graph"`, `"join"`.
#[derive(Debug, Clone, Error)]
#[error("node '{node_id}' ({node_kind}): {operation} failed: {cause}")]
pub struct NodeError {
    pub node_id: String,
    pub node_kind: String,
    pub operation: String,
    pub cause: String,
}

impl NodeError {
    pub fn new(
        node_id: impl Into<String>,
        node_kind: impl Into<String>,
        operation: impl Into<String>,
        cause: impl std::fmt::Display,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_kind: node_kind.into(),
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Top-level engine error: everything that can abort a `Serve` call.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Cancelled(#[from] CancellationError),
}
