//! Data-flow substrate between nodes and the root for template resolution:
//! a name -> value mapping plus a breadcrumb path and nesting depth.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::secrets::SecretsProvider;

/// Mutable key/value scope threaded through a workflow, carrying outputs,
/// environment, and iteration variables. Forks are shallow copies of the
/// data map; children never back-propagate mutations into the parent.
#[derive(Clone)]
pub struct ExecutionContext {
    data: HashMap<String, Value>,
    path: Vec<String>,
    depth: usize,
    secrets: Option<Arc<dyn SecretsProvider>>,
}

impl ExecutionContext {
    /// Root context for one `Serve` call: pre-populated with every process
    /// environment entry (split on the first `=`) so `{{.NAME}}` resolves.
    pub fn new_root(secrets: Option<Arc<dyn SecretsProvider>>) -> Self {
        let mut data = HashMap::new();
        for (key, value) in std::env::vars() {
            data.insert(key, Value::String(value));
        }
        Self {
            data,
            path: Vec::new(),
            depth: 0,
            secrets,
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.data.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    pub fn secrets(&self) -> Option<&Arc<dyn SecretsProvider>> {
        self.secrets.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Shallow copy of the data map; shares the secrets provider; inherits
    /// path and depth unchanged.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Fork then append `name` to the breadcrumb path and increment depth.
    /// Used for loop iterations, parallel branches, and container descent.
    pub fn with_node(&self, name: &str) -> Self {
        let mut forked = self.fork();
        forked.path.push(name.to_string());
        forked.depth += 1;
        forked
    }

    /// Snapshot exposed to leaf implementations via the `_context` reserved
    /// parameter key, and used as the root for template resolution.
    pub fn to_map(&self) -> Map<String, Value> {
        self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn breadcrumb(&self) -> String {
        self.path.join(":")
    }
}
