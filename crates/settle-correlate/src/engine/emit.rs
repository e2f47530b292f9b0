//! Emit gate and hand-off to the beacon sink

use super::{CallSite, Engine, Transition};
use settle_core::model::{Millis, TimingRecord};
use tracing::{debug, info, warn};

impl Engine {
    /// Hand a record to the sink, or queue it while the gate is closed.
    /// Queued records keep their order.
    pub(super) fn emit(&mut self, now: Millis, record: TimingRecord) {
        if self.deferred.is_empty() && self.host.gate.is_ready() {
            self.deliver(record);
            return;
        }

        let beacon_id = record.beacon_id.clone();
        self.deferred.push_back(record);
        let retry_at = self.timers.arm_emit_retry(now, self.settings.emit_retry_ms);
        self.stats.records_deferred += 1;
        debug!("Emit gate closed, {} record(s) queued", self.deferred.len());
        self.record(Transition::Deferred {
            beacon_id,
            queued: self.deferred.len(),
            retry_at,
        });
    }

    pub(super) fn retry_emit(&mut self, now: Millis) {
        if !self.host.gate.is_ready() {
            if !self.deferred.is_empty() {
                self.timers.arm_emit_retry(now, self.settings.emit_retry_ms);
            }
            return;
        }
        while let Some(record) = self.deferred.pop_front() {
            self.deliver(record);
        }
    }

    fn deliver(&mut self, record: TimingRecord) {
        let beacon_id = record.beacon_id.clone();
        match self.host.sink.deliver(record) {
            Ok(()) => {
                self.stats.records_emitted += 1;
                self.record(Transition::Emitted { beacon_id });
            }
            Err(e) => {
                warn!("Failed to deliver beacon {}: {}", beacon_id, e);
                self.stats.delivery_failures += 1;
                self.record(Transition::DeliveryFailed { beacon_id });
            }
        }
    }

    /// Page is going away: finalize everything worth reporting as aborted,
    /// drop the rest, and try one last hand-off.
    ///
    /// Returns the number of records still stuck behind the gate.
    pub fn shutdown(&mut self, now: Millis) -> usize {
        for event in self.store.open_indices() {
            let interesting = self
                .store
                .get(event)
                .is_some_and(|pending| pending.is_interesting());
            if interesting {
                self.abort(event, now);
            } else {
                self.discard(event);
            }
        }

        let standalone: Vec<_> = self
            .calls
            .drain()
            .filter_map(|(_, site)| match site {
                CallSite::Standalone(pending) => Some(pending),
                _ => None,
            })
            .collect();
        for mut pending in standalone {
            pending.aborted = true;
            self.stats.events_aborted += 1;
            self.finish(None, *pending, now);
        }

        self.timers.clear();
        self.retry_emit(now);
        info!(
            "Engine shut down ({} finalized, {} left queued)",
            self.stats.events_finalized,
            self.deferred.len()
        );
        self.deferred.len()
    }
}
