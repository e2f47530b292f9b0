//! Activity correlation engine
//!
//! Owns the pending event store, the node tracker, the timers and the filter.
//! The host feeds it signals with the current time and drives its timers with
//! [`Engine::advance`]; finalized events leave through the [`BeaconSink`].

mod emit;
mod journal;
mod mutation;
mod network;


pub use journal::{IgnoreReason, Input, Transition};

use crate::error::{CorrelateError, CorrelateResult};
use crate::filter::{ResourceFilter, UrlExclusions};
use crate::stats::EngineStats;
use crate::store::{EventStore, PendingEvent};
use crate::timer::{Due, TimerManager};
use crate::timing::TimingCorrelator;
use crate::tracker::NodeTracker;
use settle_core::config::{EngineSettings, ExclusionSettings};
use settle_core::host::{
    AlwaysReady, BeaconSink, DocumentHost, EmitGate, EmptyTimeline, PerformanceTimeline,
    RecordingDocument,
};
use settle_core::model::{
    CallId, EventIndex, EventKind, InitiatingSignal, Millis, NetworkCallSignal, ResourceKind,
    ResourceOutcome, ResourceRecord, ResourceTag, TimingRecord,
};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// The host objects the engine talks to
pub struct Collaborators {
    pub document: Box<dyn DocumentHost>,
    pub timeline: Box<dyn PerformanceTimeline>,
    pub gate: Box<dyn EmitGate>,
    pub sink: Box<dyn BeaconSink>,
}

impl Collaborators {
    /// Deliver to `sink`, with an empty timeline and an open gate
    pub fn new(sink: impl BeaconSink + 'static) -> Self {
        Self {
            document: Box::new(RecordingDocument::new()),
            timeline: Box::new(EmptyTimeline),
            gate: Box::new(AlwaysReady),
            sink: Box::new(sink),
        }
    }

    pub fn with_document(mut self, document: impl DocumentHost + 'static) -> Self {
        self.document = Box::new(document);
        self
    }

    pub fn with_timeline(mut self, timeline: impl PerformanceTimeline + 'static) -> Self {
        self.timeline = Box::new(timeline);
        self
    }

    pub fn with_gate(mut self, gate: impl EmitGate + 'static) -> Self {
        self.gate = Box::new(gate);
        self
    }
}

/// Where an in-flight network call is accounted
#[derive(Debug)]
enum CallSite {
    /// The call opened this event
    Primary(EventIndex),
    /// The call was merged into an event as a tracked resource
    Resource(ResourceTag),
    /// Finalized on its own when it settles
    Standalone(Box<PendingEvent>),
}

/// Result of applying the overlap rules to an initiating signal
#[derive(Debug, Clone, Copy, PartialEq)]
enum Opening {
    Opened(EventIndex),
    Merged(ResourceTag),
    Standalone,
    Ignored,
}

pub struct Engine {
    settings: EngineSettings,
    filter: ResourceFilter,
    correlator: TimingCorrelator,
    store: EventStore,
    tracker: NodeTracker,
    timers: TimerManager,
    calls: HashMap<CallId, CallSite>,
    deferred: VecDeque<TimingRecord>,
    observing: bool,
    host: Collaborators,
    journal: Vec<Transition>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(
        settings: &EngineSettings,
        exclusions: &ExclusionSettings,
        host: Collaborators,
    ) -> CorrelateResult<Self> {
        let filter = ResourceFilter::new(UrlExclusions::from_settings(exclusions)?);
        Self::with_filter(settings, filter, host)
    }

    pub fn with_filter(
        settings: &EngineSettings,
        filter: ResourceFilter,
        host: Collaborators,
    ) -> CorrelateResult<Self> {
        validate(settings)?;
        Ok(Self {
            settings: settings.clone(),
            filter,
            correlator: TimingCorrelator::new(settings.timeline_start_tolerance_ms),
            store: EventStore::new(),
            tracker: NodeTracker::new(),
            timers: TimerManager::new(),
            calls: HashMap::new(),
            deferred: VecDeque::new(),
            observing: false,
            host,
            journal: Vec::new(),
            stats: EngineStats::default(),
        })
    }

    /// Fire timers due at `now`, apply `input`, and return what happened
    pub fn step(&mut self, now: Millis, input: Input) -> Vec<Transition> {
        self.advance(now);
        match input {
            Input::Click(click) => {
                self.add_event(now, InitiatingSignal::Click(click));
            }
            Input::NetworkCall(call) => {
                self.network_call_started(now, call);
            }
            Input::Navigation(nav) => {
                self.add_event(now, InitiatingSignal::Navigation(nav));
            }
            Input::NetworkResponseStarted { call_id } => {
                self.network_response_started(now, call_id);
            }
            Input::NetworkCallSettled { call_id, outcome } => {
                self.network_call_settled(now, call_id, outcome);
            }
            Input::Mutations { records } => self.on_mutations(now, &records),
            Input::NodeSettled { node, outcome } => self.node_settled(now, node, outcome),
            Input::WaitComplete { event } => self.wait_complete(now, event),
            Input::Tick => {}
        }
        self.take_journal()
    }

    /// Fire every timer whose deadline is at or before `now`, each with its own
    /// deadline as the current time.
    pub fn advance(&mut self, now: Millis) {
        while let Some(due) = self.timers.pop_due(now) {
            match due {
                Due::Idle { event, at } => self.idle_timeout(event, at),
                Due::EmitRetry { at } => self.retry_emit(at),
            }
        }
    }

    /// Earliest pending timer, for hosts that schedule wake-ups
    pub fn next_deadline(&self) -> Option<Millis> {
        self.timers.next_deadline()
    }

    /// Open, merge or ignore an event for an initiating signal.
    ///
    /// Returns the index of a newly opened event.
    pub fn add_event(&mut self, now: Millis, signal: InitiatingSignal) -> Option<EventIndex> {
        match self.open(now, signal) {
            Opening::Opened(index) => Some(index),
            _ => None,
        }
    }

    /// Attach a resource to the latest open event
    pub fn add_resource_to_event(
        &mut self,
        _now: Millis,
        resource: ResourceRecord,
    ) -> Option<ResourceTag> {
        let (event, _) = self.store.last_open()?;
        let pending = self.store.get_mut(event)?;
        let slot = pending.attach(resource);
        let tag = ResourceTag { event, slot };
        self.timers.clear_for(event);
        self.record(Transition::Merged { tag });
        Some(tag)
    }

    /// A navigation's caller-controlled wait condition finished
    pub fn wait_complete(&mut self, now: Millis, event: EventIndex) {
        let slot = self.store.get(event).and_then(|e| {
            e.resources
                .iter()
                .position(|r| r.kind == ResourceKind::Wait && !r.is_complete())
        });
        match slot {
            Some(slot) => self.close_slot(
                ResourceTag { event, slot },
                ResourceOutcome::Loaded,
                now,
            ),
            None => debug!("No wait condition pending for event {}", event),
        }
    }

    /// Outstanding count of one event, or of everything still in flight
    pub fn outstanding_count(&self, event: Option<EventIndex>) -> u32 {
        let standalone = || {
            self.calls
                .values()
                .filter(|site| matches!(site, CallSite::Standalone(_)))
                .count() as u32
        };
        match event {
            Some(_) => self.store.outstanding(event),
            None => self.store.outstanding(None) + standalone(),
        }
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Number of records waiting on the emit gate
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Drain transitions recorded by direct method calls
    pub fn take_journal(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.journal)
    }

    fn record(&mut self, transition: Transition) {
        debug!(?transition, "engine transition");
        self.journal.push(transition);
    }

    // =========================================================================
    // OVERLAP RULES
    // =========================================================================

    fn open(&mut self, now: Millis, signal: InitiatingSignal) -> Opening {
        let kind = signal.kind();

        if let InitiatingSignal::NetworkCall(call) = &signal {
            if call.url.is_empty() {
                return self.ignore(kind, IgnoreReason::EmptyUrl);
            }
            if self.filter.is_excluded(&call.url) {
                return self.ignore(kind, IgnoreReason::ExcludedUrl);
            }
            if self.settings.always_finalize_network_calls {
                let mut pending = PendingEvent::new(kind, call_record(call, now), now);
                pending.expect_one();
                self.calls
                    .insert(call.call_id, CallSite::Standalone(Box::new(pending)));
                self.stats.calls_standalone += 1;
                self.record(Transition::Standalone {
                    call_id: call.call_id,
                });
                return Opening::Standalone;
            }
        }

        let mut last = self
            .store
            .last_open()
            .map(|(index, e)| (index, e.kind, e.outstanding, e.has_url()));

        if let Some((index, EventKind::Click, outstanding, has_url)) = last {
            if outstanding == 0 || !has_url {
                self.discard(index);
                last = None;
            }
        }

        if let Some((index, last_kind, _, _)) = last {
            match (last_kind, &signal) {
                (EventKind::NetworkCall, InitiatingSignal::Click(_)) => {
                    return self.ignore(kind, IgnoreReason::ClickDuringNetworkCall);
                }
                (EventKind::NetworkCall, InitiatingSignal::NetworkCall(call))
                | (EventKind::SoftNavigation, InitiatingSignal::NetworkCall(call))
                | (EventKind::HardNavigation, InitiatingSignal::NetworkCall(call)) => {
                    return self.merge_call(now, call.call_id, call_record(call, now));
                }
                (last_kind, InitiatingSignal::Navigation(_)) if last_kind.is_navigation() => {
                    self.abort(index, now);
                }
                _ => {}
            }
        }

        self.push(now, signal)
    }

    fn ignore(&mut self, kind: EventKind, reason: IgnoreReason) -> Opening {
        debug!("Ignoring {} signal: {:?}", kind, reason);
        self.stats.signals_ignored += 1;
        self.record(Transition::Ignored { kind, reason });
        Opening::Ignored
    }

    fn merge_call(&mut self, now: Millis, call_id: CallId, record: ResourceRecord) -> Opening {
        match self.add_resource_to_event(now, record) {
            Some(tag) => {
                self.calls.insert(call_id, CallSite::Resource(tag));
                self.stats.calls_merged += 1;
                Opening::Merged(tag)
            }
            None => Opening::Ignored,
        }
    }

    fn push(&mut self, now: Millis, signal: InitiatingSignal) -> Opening {
        let kind = signal.kind();
        let (pending, call_id, wait) = match signal {
            InitiatingSignal::Click(_) => (
                PendingEvent::new(
                    kind,
                    ResourceRecord::new(ResourceKind::Interaction, None, now),
                    now,
                ),
                None,
                false,
            ),
            InitiatingSignal::NetworkCall(call) => {
                let mut pending = PendingEvent::new(kind, call_record(&call, now), now);
                pending.expect_one();
                pending.ignore_mutations_until_first_response = true;
                (pending, Some(call.call_id), false)
            }
            InitiatingSignal::Navigation(nav) => {
                let resource = ResourceRecord::new(
                    ResourceKind::Interaction,
                    Some(nav.url),
                    nav.request_start.unwrap_or(now),
                );
                (PendingEvent::new(kind, resource, now), None, nav.wait)
            }
        };

        let event = self.store.push(pending);
        if let Some(call_id) = call_id {
            self.calls.insert(call_id, CallSite::Primary(event));
        }
        self.stats.events_opened += 1;
        info!("Opened {} event {}", kind, event);
        self.record(Transition::Opened { event, kind });
        self.set_observing(true);

        if wait {
            if let Some(pending) = self.store.get_mut(event) {
                pending.attach(ResourceRecord::new(ResourceKind::Wait, None, now));
            }
        } else if kind != EventKind::NetworkCall {
            self.arm(now, self.window(kind), event);
        }

        Opening::Opened(event)
    }

    // =========================================================================
    // COMPLETION AND TIMERS
    // =========================================================================

    fn window(&self, kind: EventKind) -> u64 {
        if kind.is_navigation() {
            self.settings.navigation_idle_timeout_ms
        } else {
            self.settings.click_idle_timeout_ms
        }
    }

    /// Arm the idle timeout for the latest event. An older event still bound
    /// to the timeout is settled on the spot, since nothing else would.
    fn arm(&mut self, now: Millis, duration_ms: u64, event: EventIndex) {
        if !self.store.is_latest(event) {
            return;
        }
        if let Some(displaced) = self.timers.idle().filter(|t| t.event != event) {
            self.timers.clear();
            self.idle_timeout(displaced.event, now);
        }
        if let Some(deadline) = self.timers.arm(now, duration_ms, event, true) {
            self.record(Transition::Armed { event, deadline });
        }
    }

    /// Count one completion against `event`
    fn resource_completed(&mut self, event: EventIndex, at: Millis) {
        let Some(pending) = self.store.get_mut(event) else {
            return;
        };
        let Some(remaining) = pending.complete_one() else {
            return;
        };
        let kind = pending.kind;
        if remaining == 0 {
            let end = &mut pending.resource.timing.load_event_end;
            *end = Some(end.map_or(at, |e| e.max(at)));
        }
        self.record(Transition::Completed { event, remaining });

        if remaining == 0 {
            if self.store.is_latest(event) {
                self.arm(at, self.window(kind), event);
            } else {
                self.finalize(event, at);
            }
        }
    }

    /// Close one tracked slot and count it against its event
    fn close_slot(
        &mut self,
        tag: ResourceTag,
        outcome: ResourceOutcome,
        at: Millis,
    ) {
        let Some(pending) = self.store.get_mut(tag.event) else {
            return;
        };
        let Some(resource) = pending.resources.get_mut(tag.slot) else {
            return;
        };
        if resource.is_complete() {
            return;
        }
        resource.outcome = Some(outcome);
        resource.timing.load_event_end = Some(at);
        if matches!(
            resource.kind,
            ResourceKind::Image | ResourceKind::Frame | ResourceKind::Stylesheet
        ) {
            let dom = &mut pending.resource.timing.dom_complete;
            *dom = Some(dom.map_or(at, |d| d.max(at)));
        }
        self.record(Transition::SlotClosed { tag, outcome });
        self.resource_completed(tag.event, at);
    }

    fn idle_timeout(&mut self, event: EventIndex, now: Millis) {
        let Some(pending) = self.store.get(event) else {
            return;
        };
        if pending.outstanding > 0 {
            return;
        }
        if pending.is_interesting() {
            self.finalize(event, now);
        } else {
            self.discard(event);
        }
    }

    /// Finalize `event` immediately as aborted, ending at `now`
    fn abort(&mut self, event: EventIndex, now: Millis) {
        if let Some(pending) = self.store.get_mut(event) {
            pending.aborted = true;
            pending.resource.timing.load_event_end = Some(now);
            self.stats.events_aborted += 1;
            self.record(Transition::Aborted { event });
            self.finalize(event, now);
        }
    }

    fn discard(&mut self, event: EventIndex) {
        if self.store.take(event).is_some() {
            self.timers.clear_for(event);
            self.stats.events_discarded += 1;
            debug!("Discarded event {}", event);
            self.record(Transition::Discarded { event });
            self.update_observing();
        }
    }

    fn finalize(&mut self, event: EventIndex, now: Millis) {
        if let Some(pending) = self.store.take(event) {
            self.timers.clear_for(event);
            self.finish(Some(event), pending, now);
            self.update_observing();
        }
    }

    fn finish(&mut self, event: Option<EventIndex>, mut pending: PendingEvent, now: Millis) {
        pending.complete = true;
        if pending.resource.timing.load_event_end.is_none() {
            pending.resource.timing.load_event_end = Some(now);
        }
        let kind = pending.kind;
        let record = pending.into_record(TimingRecord::new_beacon_id());
        info!(
            "Finalized {} event {:?} for {} ({} resources)",
            kind, event, record.url, record.total_resources
        );
        self.stats.events_finalized += 1;
        self.record(Transition::Finalized {
            event,
            kind,
            beacon_id: record.beacon_id.clone(),
        });
        self.emit(now, record);
    }

    fn set_observing(&mut self, observing: bool) {
        if self.observing != observing {
            self.observing = observing;
            self.host.document.set_observing(observing);
        }
    }

    fn update_observing(&mut self) {
        if self.store.open_count() == 0 {
            self.set_observing(false);
        }
    }
}

fn call_record(call: &NetworkCallSignal, now: Millis) -> ResourceRecord {
    ResourceRecord::network_call(
        call.url.clone(),
        call.method.clone(),
        call.initiator,
        call.request_start.unwrap_or(now),
    )
}

fn validate(settings: &EngineSettings) -> CorrelateResult<()> {
    if settings.click_idle_timeout_ms == 0 || settings.navigation_idle_timeout_ms == 0 {
        return Err(CorrelateError::InvalidConfig(
            "idle timeouts must be positive".to_string(),
        ));
    }
    if settings.uninteresting_mutation_timeout_ms == 0 {
        return Err(CorrelateError::InvalidConfig(
            "uninteresting_mutation_timeout_ms must be positive".to_string(),
        ));
    }
    if settings.uninteresting_mutation_batches == 0 {
        return Err(CorrelateError::InvalidConfig(
            "uninteresting_mutation_batches must be at least 1".to_string(),
        ));
    }
    if settings.emit_retry_ms == 0 {
        return Err(CorrelateError::InvalidConfig(
            "emit_retry_ms must be positive".to_string(),
        ));
    }
    let tolerance = settings.timeline_start_tolerance_ms;
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(CorrelateError::InvalidConfig(format!(
            "timeline_start_tolerance_ms must be a non-negative number, got {}",
            tolerance
        )));
    }
    Ok(())
}
