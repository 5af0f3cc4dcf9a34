//! Node registry: factory lookup for leaf node implementations. The registry
//! and the leaf implementations behind it are external collaborators
//! consumed through these traits — this crate never implements a concrete
//! leaf kind.

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::cancel::CancellationToken;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("unknown node kind: {0}")]
    UnknownKind(String),
    #[error("leaf execution failed: {0}")]
    Execution(String),
}

/// The `_onOutput` reserved parameter: a sink a leaf may call any number of
/// times while executing to stream a single line of output (e.g. a shell
/// command's stdout) through the configured messenger, rather than only
/// returning a value at the end.
pub trait OutputSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// A registered leaf implements a single operation. Synchronous by design —
/// the executor runs it inside `spawn_blocking` so a blocking leaf (shell
/// exec, blocking HTTP) never stalls the async runtime.
pub trait LeafNode: Send {
    fn execute(
        &self,
        token: CancellationToken,
        params: Map<String, Value>,
        output: Arc<dyn OutputSink>,
    ) -> Result<Value, RegistryError>;
}

/// `GetNew(kind)` must return a **fresh** instance with no shared mutable
/// state across calls. Must be safe for concurrent readers; registration is
/// exclusive and happens at configuration time, before execution starts.
pub trait NodeRegistry: Send + Sync {
    fn get_new(&self, kind: &str) -> Result<Box<dyn LeafNode>, RegistryError>;
    fn has(&self, kind: &str) -> bool;
    fn list(&self) -> Vec<String>;
}
