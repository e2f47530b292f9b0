//! Host collaborator traits
//!
//! The correlation engine is driven by its host (a browser binding, the replay
//! CLI, or a test). Everything the engine needs from the outside world goes
//! through one of these traits, so the engine itself performs no I/O.

use crate::model::{Millis, NodeId, TimelineEntry, TimingRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Collaborator failure
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Failed to attach listeners to {0}")]
    ListenerAttach(NodeId),

    #[error("Performance timeline unavailable: {0}")]
    TimelineUnavailable(String),

    #[error("Beacon delivery failed: {0}")]
    Delivery(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type HostResult<T> = Result<T, HostError>;

/// The document the engine observes
pub trait DocumentHost: Send {
    /// Pause or resume the mutation subscription
    fn set_observing(&mut self, observing: bool);

    /// Attach load and error listeners to a node. The host reports either
    /// outcome back through the engine's node completion entry point.
    fn listen(&mut self, node: NodeId) -> HostResult<()>;
}

/// The browser's performance timeline
pub trait PerformanceTimeline: Send {
    /// Absolute time that timeline-relative values are measured from
    fn time_origin(&self) -> Millis {
        0.0
    }

    /// All entries recorded for `url`
    fn query_by_url(&self, url: &str) -> HostResult<Vec<TimelineEntry>>;
}

/// "Ready to emit" gate consulted before every hand-off
pub trait EmitGate: Send {
    fn is_ready(&self) -> bool;
}

/// Transport hand-off for finalized records
pub trait BeaconSink: Send {
    fn deliver(&mut self, record: TimingRecord) -> HostResult<()>;
}

// =============================================================================
// IN-MEMORY COLLABORATORS
// =============================================================================

/// Gate that is always open
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl EmitGate for AlwaysReady {
    fn is_ready(&self) -> bool {
        true
    }
}

/// Shared readiness flag; clones toggle the same gate
#[derive(Debug, Clone)]
pub struct ReadyFlag(Arc<AtomicBool>);

impl ReadyFlag {
    pub fn new(ready: bool) -> Self {
        Self(Arc::new(AtomicBool::new(ready)))
    }

    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Relaxed);
    }
}

impl Default for ReadyFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EmitGate for ReadyFlag {
    fn is_ready(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Timeline with no entries
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyTimeline;

impl PerformanceTimeline for EmptyTimeline {
    fn query_by_url(&self, _url: &str) -> HostResult<Vec<TimelineEntry>> {
        Ok(Vec::new())
    }
}

/// Shared in-memory timeline; clones see the same entries
#[derive(Debug, Clone, Default)]
pub struct StaticTimeline {
    origin: Millis,
    entries: Arc<RwLock<HashMap<String, Vec<TimelineEntry>>>>,
}

impl StaticTimeline {
    pub fn new(origin: Millis) -> Self {
        Self {
            origin,
            entries: Arc::default(),
        }
    }

    /// Record an entry under its own name
    pub fn push(&self, entry: TimelineEntry) {
        self.entries
            .write()
            .entry(entry.name.clone())
            .or_default()
            .push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PerformanceTimeline for StaticTimeline {
    fn time_origin(&self) -> Millis {
        self.origin
    }

    fn query_by_url(&self, url: &str) -> HostResult<Vec<TimelineEntry>> {
        Ok(self.entries.read().get(url).cloned().unwrap_or_default())
    }
}

/// What a `RecordingDocument` has been asked to do
#[derive(Debug, Default)]
pub struct DocumentLog {
    pub observing: bool,
    pub observe_changes: u32,
    pub listening: Vec<NodeId>,
    pub refuse: HashSet<NodeId>,
}

/// Document host that records calls; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct RecordingDocument {
    log: Arc<Mutex<DocumentLog>>,
}

impl RecordingDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `listen` fail for `node`
    pub fn refuse(&self, node: NodeId) {
        self.log.lock().refuse.insert(node);
    }

    pub fn is_observing(&self) -> bool {
        self.log.lock().observing
    }

    pub fn observe_changes(&self) -> u32 {
        self.log.lock().observe_changes
    }

    pub fn listening(&self) -> Vec<NodeId> {
        self.log.lock().listening.clone()
    }
}

impl DocumentHost for RecordingDocument {
    fn set_observing(&mut self, observing: bool) {
        let mut log = self.log.lock();
        if log.observing != observing {
            log.observe_changes += 1;
        }
        log.observing = observing;
    }

    fn listen(&mut self, node: NodeId) -> HostResult<()> {
        let mut log = self.log.lock();
        if log.refuse.contains(&node) {
            return Err(HostError::ListenerAttach(node));
        }
        log.listening.push(node);
        Ok(())
    }
}
