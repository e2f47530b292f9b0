//! Network call lifecycle, as reported by the interception layer

use super::{CallSite, Engine, Opening, Transition};
use crate::timing::Correlation;
use settle_core::model::{
    CallId, CallOutcome, EventIndex, InitiatingSignal, Millis, NetworkCallSignal,
    ResourceOutcome, ResourceRecord,
};
use tracing::debug;

impl Engine {
    /// A call was sent. Returns the event it opened or joined.
    pub fn network_call_started(
        &mut self,
        now: Millis,
        call: NetworkCallSignal,
    ) -> Option<EventIndex> {
        match self.open(now, InitiatingSignal::NetworkCall(call)) {
            Opening::Opened(event) => Some(event),
            Opening::Merged(tag) => Some(tag.event),
            Opening::Standalone | Opening::Ignored => None,
        }
    }

    /// First response bytes arrived. Mutations caused by the call can now
    /// be attributed to its event.
    pub fn network_response_started(&mut self, now: Millis, call_id: CallId) {
        match self.calls.get_mut(&call_id) {
            Some(CallSite::Primary(event)) => {
                if let Some(pending) = self.store.get_mut(*event) {
                    pending.ignore_mutations_until_first_response = false;
                    pending.resource.timing.response_start.get_or_insert(now);
                }
            }
            Some(CallSite::Resource(tag)) => {
                if let Some(resource) = self
                    .store
                    .get_mut(tag.event)
                    .and_then(|e| e.resources.get_mut(tag.slot))
                {
                    resource.timing.response_start.get_or_insert(now);
                }
            }
            Some(CallSite::Standalone(pending)) => {
                pending.resource.timing.response_start.get_or_insert(now);
            }
            None => debug!("Response for unknown call {}", call_id),
        }
    }

    /// The call finished, successfully or not
    pub fn network_call_settled(&mut self, now: Millis, call_id: CallId, outcome: CallOutcome) {
        let Some(site) = self.calls.remove(&call_id) else {
            debug!("Settle for unknown call {}", call_id);
            return;
        };

        match site {
            CallSite::Primary(event) => {
                let correlation = match self.store.get_mut(event) {
                    Some(pending) => {
                        pending.ignore_mutations_until_first_response = false;
                        apply_outcome(&mut pending.resource, &outcome, now);
                        self.correlator
                            .correlate(self.host.timeline.as_ref(), &mut pending.resource)
                    }
                    None => return,
                };
                self.note_correlation(call_id, correlation);
                self.resource_completed(event, now);
            }
            CallSite::Resource(tag) => {
                let correlation = match self
                    .store
                    .get_mut(tag.event)
                    .and_then(|e| e.resources.get_mut(tag.slot))
                {
                    Some(resource) => {
                        apply_outcome(resource, &outcome, now);
                        self.correlator
                            .correlate(self.host.timeline.as_ref(), resource)
                    }
                    None => return,
                };
                self.note_correlation(call_id, correlation);
                self.record(Transition::SlotClosed {
                    tag,
                    outcome: call_outcome(&outcome),
                });
                self.resource_completed(tag.event, now);
            }
            CallSite::Standalone(mut pending) => {
                apply_outcome(&mut pending.resource, &outcome, now);
                let correlation = self
                    .correlator
                    .correlate(self.host.timeline.as_ref(), &mut pending.resource);
                self.note_correlation(call_id, correlation);
                pending.complete_one();
                self.finish(None, *pending, now);
            }
        }
    }

    fn note_correlation(&mut self, call_id: CallId, correlation: Correlation) {
        match correlation {
            Correlation::Matched => self.stats.correlations_matched += 1,
            Correlation::Miss => self.stats.correlations_missed += 1,
        }
        self.record(Transition::Correlated {
            call_id,
            correlation,
        });
    }
}

/// A call without a status never reached the server
fn call_outcome(outcome: &CallOutcome) -> ResourceOutcome {
    match outcome.status {
        None | Some(0) => ResourceOutcome::Failed,
        Some(_) => ResourceOutcome::Loaded,
    }
}

/// Record wall-clock timing and status on a call's resource
fn apply_outcome(resource: &mut ResourceRecord, outcome: &CallOutcome, now: Millis) {
    let timing = &mut resource.timing;
    if let Some(start) = outcome.response_start {
        timing.response_start = Some(start);
    }
    timing.response_end = Some(outcome.response_end.unwrap_or(now));
    timing.load_event_end = Some(now);
    resource.status = outcome.status.filter(|s| *s != 0);
    resource.outcome = Some(call_outcome(outcome));
}
