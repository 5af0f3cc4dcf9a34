//! Progress messenger: an optional sink (TUI/CLI display, etc.) receiving
//! structured lifecycle events. Consumed, not implemented, by this crate.

use std::time::Duration;

/// Structured lifecycle events emitted by the executor and loop engine.
pub trait Messenger: Send + Sync {
    fn node_started(&self, id: &str, name: &str, kind: &str);
    fn node_completed(&self, id: &str, duration: Duration, error: Option<&str>);
    fn loop_child(&self, loop_id: &str, child_name: &str, index: usize, total: usize);

    /// One streamed output line from a leaf, already formatted with its
    /// breadcrumb and tool-kind prefix. Default no-op so existing sinks that
    /// don't care about line-level output don't need updating.
    fn node_output(&self, _id: &str, _line: &str) {}
}

/// Default sink used when no messenger is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMessenger;

impl Messenger for NoopMessenger {
    fn node_started(&self, _id: &str, _name: &str, _kind: &str) {}
    fn node_completed(&self, _id: &str, _duration: Duration, _error: Option<&str>) {}
    fn loop_child(&self, _loop_id: &str, _child_name: &str, _index: usize, _total: usize) {}
}
