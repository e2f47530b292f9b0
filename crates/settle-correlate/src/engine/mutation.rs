//! Mutation callback and node completion

use super::{Engine, Transition};
use crate::filter::Candidate;
use settle_core::model::{
    EventIndex, LoadOutcome, Millis, MutationRecord, NodeId, NodeSnapshot, ResourceOutcome,
    ResourceRecord, ResourceTag,
};
use std::iter;
use tracing::{debug, warn};

impl Engine {
    /// Handle one mutation-observer batch.
    ///
    /// Removals close watched nodes of any event. Additions and attribute
    /// changes only count for the latest open event.
    pub fn on_mutations(&mut self, now: Millis, records: &[MutationRecord]) {
        for record in records {
            if let MutationRecord::ChildList { removed, .. } = record {
                for node in removed {
                    self.detach(now, node);
                }
            }
        }

        let Some((event, pending)) = self.store.last_open() else {
            return;
        };
        if pending.ignore_mutations_until_first_response {
            self.record(Transition::MutationsSkipped { event });
            return;
        }

        let mut accepted = 0;
        for record in records {
            match record {
                MutationRecord::Attributes { target, .. } => {
                    accepted += self.consider(now, event, target);
                }
                MutationRecord::ChildList { added, .. } => {
                    for node in added {
                        accepted += self.consider(now, event, node);
                    }
                }
            }
        }

        self.after_batch(now, event, accepted);
    }

    /// A watched node fired its load or error listener
    pub fn node_settled(&mut self, now: Millis, node: NodeId, outcome: LoadOutcome) {
        match self.tracker.settle(node, now) {
            Some(tag) => {
                let outcome = match outcome {
                    LoadOutcome::Loaded => ResourceOutcome::Loaded,
                    LoadOutcome::Failed => ResourceOutcome::Failed,
                };
                self.close_slot(tag, outcome, now);
            }
            None if self.tracker.get(node).is_some() => {
                self.stats.duplicate_completions += 1;
                self.record(Transition::DuplicateCompletion { node });
            }
            None => debug!("Completion for untracked {}", node),
        }
    }

    /// Run the filter over one mutation target; returns how many nodes were
    /// watched.
    fn consider(&mut self, now: Millis, event: EventIndex, node: &NodeSnapshot) -> u32 {
        let candidates = self
            .filter
            .candidates(node, |id| self.tracker.prior(id));
        let mut watched = 0;
        for candidate in candidates {
            if self.watch(now, event, candidate) {
                watched += 1;
            }
        }
        watched
    }

    fn watch(&mut self, now: Millis, event: EventIndex, candidate: Candidate) -> bool {
        let Some(pending) = self.store.get(event) else {
            return false;
        };
        if pending.has_seen(&candidate.url) {
            return false;
        }

        if let Err(e) = self.host.document.listen(candidate.node) {
            warn!("Skipping {}: {}", candidate.node, e);
            self.stats.listener_failures += 1;
            self.record(Transition::ListenerFailed {
                node: candidate.node,
            });
            return false;
        }

        let mut record = ResourceRecord::new(candidate.kind, Some(candidate.url.clone()), now);
        record.node = Some(candidate.node);
        let Some(pending) = self.store.get_mut(event) else {
            return false;
        };
        let slot = pending.attach(record);
        let tag = ResourceTag { event, slot };
        self.timers.clear_for(event);
        self.stats.resources_watched += 1;
        self.record(Transition::Watched {
            tag,
            node: candidate.node,
            url: candidate.url.clone(),
        });

        if let Some(superseded) =
            self.tracker
                .begin(candidate.node, tag, candidate.url, candidate.tag)
        {
            if self.tracker.settle_slot(candidate.node, superseded, now) {
                self.close_slot(superseded, ResourceOutcome::Superseded, now);
            }
        }
        true
    }

    /// Close any watched, still-loading node in a removed subtree and forget it
    fn detach(&mut self, now: Millis, node: &NodeSnapshot) {
        for n in iter::once(node).chain(node.descendants()) {
            if let Some(tag) = self.tracker.pending_slot(n.id) {
                self.tracker.settle(n.id, now);
                self.stats.resources_detached += 1;
                self.close_slot(tag, ResourceOutcome::Detached, now);
            }
            self.tracker.forget(n.id);
        }
    }

    /// Bookkeeping for batches that produced nothing to wait for
    fn after_batch(&mut self, now: Millis, event: EventIndex, accepted: u32) {
        let batches = self.settings.uninteresting_mutation_batches;
        let Some(pending) = self.store.get_mut(event) else {
            return;
        };
        if accepted > 0 {
            pending.quiet_batches = 0;
            return;
        }
        if pending.total > 0 {
            return;
        }
        pending.quiet_batches += 1;
        if pending.quiet_batches >= batches && !pending.timeout_extended_once {
            pending.timeout_extended_once = true;
            let timeout = self.settings.uninteresting_mutation_timeout_ms;
            self.arm(now, timeout, event);
        }
    }
}
