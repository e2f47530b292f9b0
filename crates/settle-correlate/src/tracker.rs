//! Node completion tracking
//!
//! A side-table from node identity to the event slot the node is loading for.
//! The host owns the nodes; the tracker only remembers what it asked the host
//! to listen to and which slots have already completed.

use crate::filter::PriorWatch;
use settle_core::model::{Millis, NodeId, ResourceTag};
use std::collections::HashMap;

/// Tracking metadata for one node
#[derive(Debug, Clone)]
pub struct NodeWatch {
    /// Slot the node is currently loading for
    pub active: ResourceTag,

    /// URL of the active slot
    pub url: String,

    /// Upper-case node name
    pub tag: String,

    /// Completion timestamp per slot; a node reused for a new URL gets a new slot
    pub ends: HashMap<ResourceTag, Millis>,
}

impl NodeWatch {
    pub fn is_active_complete(&self) -> bool {
        self.ends.contains_key(&self.active)
    }
}

#[derive(Debug, Default)]
pub struct NodeTracker {
    nodes: HashMap<NodeId, NodeWatch>,
}

impl NodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: NodeId) -> Option<&NodeWatch> {
        self.nodes.get(&node)
    }

    /// Last URL the node was watched for, and whether that load finished
    pub fn prior(&self, node: NodeId) -> Option<PriorWatch<'_>> {
        self.nodes.get(&node).map(|w| PriorWatch {
            url: &w.url,
            complete: w.is_active_complete(),
        })
    }

    /// Slot the node is still loading for, if any
    pub fn pending_slot(&self, node: NodeId) -> Option<ResourceTag> {
        self.nodes
            .get(&node)
            .filter(|w| !w.is_active_complete())
            .map(|w| w.active)
    }

    /// Start tracking `node` for `slot`.
    ///
    /// Returns the node's previous slot if it was still loading; the caller
    /// must complete it, since that load will never be reported now.
    pub fn begin(
        &mut self,
        node: NodeId,
        slot: ResourceTag,
        url: impl Into<String>,
        tag: impl Into<String>,
    ) -> Option<ResourceTag> {
        let url = url.into();
        let tag = tag.into();
        match self.nodes.get_mut(&node) {
            Some(watch) => {
                let superseded = (!watch.is_active_complete()).then_some(watch.active);
                watch.active = slot;
                watch.url = url;
                watch.tag = tag;
                superseded
            }
            None => {
                self.nodes.insert(
                    node,
                    NodeWatch {
                        active: slot,
                        url,
                        tag,
                        ends: HashMap::new(),
                    },
                );
                None
            }
        }
    }

    /// Record completion of the node's active slot.
    ///
    /// Returns the slot the first time only, so a load and an error for the
    /// same fetch count once.
    pub fn settle(&mut self, node: NodeId, at: Millis) -> Option<ResourceTag> {
        let watch = self.nodes.get_mut(&node)?;
        if watch.is_active_complete() {
            return None;
        }
        watch.ends.insert(watch.active, at);
        Some(watch.active)
    }

    /// Record completion of a specific slot (used for superseded slots)
    pub fn settle_slot(&mut self, node: NodeId, slot: ResourceTag, at: Millis) -> bool {
        match self.nodes.get_mut(&node) {
            Some(watch) if !watch.ends.contains_key(&slot) => {
                watch.ends.insert(slot, at);
                true
            }
            _ => false,
        }
    }

    /// Drop a node from the table (it left the document)
    pub fn forget(&mut self, node: NodeId) -> Option<NodeWatch> {
        self.nodes.remove(&node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
