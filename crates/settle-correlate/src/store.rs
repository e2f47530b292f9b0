//! Pending event store
//!
//! Append-only. Finished events are nulled rather than removed so that
//! indices held by timers, node watches and in-flight calls stay valid.

use settle_core::model::{
    EventIndex, EventKind, Millis, ResourceRecord, ResourceTiming, TimingRecord,
};
use std::collections::HashSet;

/// One in-flight interaction
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub kind: EventKind,

    /// Primary descriptor for the beacon
    pub resource: ResourceRecord,

    /// Resources, calls and wait conditions still pending
    pub outstanding: u32,

    /// Lifetime count of everything ever attached
    pub total: u32,

    /// Tracked resources, excluding the primary call
    pub resources: Vec<ResourceRecord>,

    /// URLs already attached
    pub seen_urls: HashSet<String>,

    pub aborted: bool,
    pub complete: bool,
    pub ignore_mutations_until_first_response: bool,
    pub timeout_extended_once: bool,

    /// Consecutive mutation batches that produced nothing to watch
    pub quiet_batches: u32,

    pub opened_at: Millis,
}

impl PendingEvent {
    pub fn new(kind: EventKind, resource: ResourceRecord, opened_at: Millis) -> Self {
        Self {
            kind,
            resource,
            outstanding: 0,
            total: 0,
            resources: Vec::new(),
            seen_urls: HashSet::new(),
            aborted: false,
            complete: false,
            ignore_mutations_until_first_response: false,
            timeout_extended_once: false,
            quiet_batches: 0,
            opened_at,
        }
    }

    pub fn has_url(&self) -> bool {
        self.resource.url.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Produced at least one resource and knows what to report
    pub fn is_interesting(&self) -> bool {
        self.total > 0 && self.has_url()
    }

    pub fn has_seen(&self, url: &str) -> bool {
        self.seen_urls.contains(url)
    }

    /// Count something the event must wait for
    pub fn expect_one(&mut self) {
        self.outstanding += 1;
        self.total += 1;
    }

    /// Append a tracked resource and count it; returns its slot.
    ///
    /// A click learns its URL from the first resource it causes.
    pub fn attach(&mut self, record: ResourceRecord) -> usize {
        if let Some(url) = &record.url {
            self.seen_urls.insert(url.clone());
            if self.kind == EventKind::Click && !self.has_url() {
                self.resource.url = Some(url.clone());
            }
        }
        self.expect_one();
        self.resources.push(record);
        self.resources.len() - 1
    }

    /// Count one completion; returns what remains, or `None` if nothing was
    /// outstanding.
    pub fn complete_one(&mut self) -> Option<u32> {
        if self.outstanding == 0 {
            return None;
        }
        self.outstanding -= 1;
        Some(self.outstanding)
    }

    /// Consolidated record for the transport layer
    pub fn into_record(self, beacon_id: String) -> TimingRecord {
        let mut timing: ResourceTiming = self.resource.timing;
        if let (Some(end), Some(response_end)) = (timing.load_event_end, timing.response_end) {
            if end < response_end {
                timing.load_event_end = Some(response_end);
            }
        }

        TimingRecord {
            beacon_id,
            kind: self.kind,
            initiator: self.kind.beacon_initiator(self.resource.initiator).to_string(),
            url: self.resource.url.unwrap_or_default(),
            method: self.resource.method,
            status: self.resource.status,
            outcome: self.resource.outcome,
            aborted: self.aborted,
            timing,
            total_resources: self.total,
            resources: self.resources,
            timeline: self.resource.timeline,
        }
    }
}

/// Ordered list of pending events
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Option<PendingEvent>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: PendingEvent) -> EventIndex {
        self.events.push(Some(event));
        self.events.len() - 1
    }

    pub fn get(&self, index: EventIndex) -> Option<&PendingEvent> {
        self.events.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: EventIndex) -> Option<&mut PendingEvent> {
        self.events.get_mut(index).and_then(Option::as_mut)
    }

    /// Index of the most recently opened event, finished or not
    pub fn last_index(&self) -> Option<EventIndex> {
        self.events.len().checked_sub(1)
    }

    pub fn is_latest(&self, index: EventIndex) -> bool {
        self.last_index() == Some(index)
    }

    /// The most recent event, if it is still open
    pub fn last_open(&self) -> Option<(EventIndex, &PendingEvent)> {
        let index = self.last_index()?;
        self.get(index)
            .filter(|e| !e.complete)
            .map(|e| (index, e))
    }

    /// Null the slot and hand back the event
    pub fn take(&mut self, index: EventIndex) -> Option<PendingEvent> {
        self.events.get_mut(index).and_then(Option::take).map(|mut e| {
            e.complete = true;
            e
        })
    }

    pub fn open_indices(&self) -> Vec<EventIndex> {
        self.events
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().filter(|e| !e.complete).map(|_| i))
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.events.iter().flatten().filter(|e| !e.complete).count()
    }

    /// Outstanding count of one event, or of every open event
    pub fn outstanding(&self, index: Option<EventIndex>) -> u32 {
        match index {
            Some(i) => self.get(i).map(|e| e.outstanding).unwrap_or(0),
            None => self
                .events
                .iter()
                .flatten()
                .filter(|e| !e.complete)
                .map(|e| e.outstanding)
                .sum(),
        }
    }

    /// Number of slots ever allocated
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_core::model::{Initiator, ResourceKind};

    fn click(at: Millis) -> PendingEvent {
        PendingEvent::new(
            EventKind::Click,
            ResourceRecord::new(ResourceKind::Interaction, None, at),
            at,
        )
    }

    #[test]
    fn test_click_adopts_first_resource_url() {
        let mut event = click(0.0);
        assert!(!event.has_url());

        let slot = event.attach(ResourceRecord::new(
            ResourceKind::Image,
            Some("https://cdn.example.com/a.png".to_string()),
            5.0,
        ));
        event.attach(ResourceRecord::new(
            ResourceKind::Image,
            Some("https://cdn.example.com/b.png".to_string()),
            6.0,
        ));

        assert_eq!(slot, 0);
        assert_eq!(event.resource.url.as_deref(), Some("https://cdn.example.com/a.png"));
        assert_eq!((event.outstanding, event.total), (2, 2));
        assert!(event.has_seen("https://cdn.example.com/b.png"));
        assert!(event.is_interesting());
    }

    #[test]
    fn test_complete_one_never_goes_negative() {
        let mut event = click(0.0);
        event.expect_one();
        assert_eq!(event.complete_one(), Some(0));
        assert_eq!(event.complete_one(), None);
        assert_eq!(event.outstanding, 0);
    }

    #[test]
    fn test_take_preserves_indices() {
        let mut store = EventStore::new();
        let a = store.push(click(0.0));
        let b = store.push(click(10.0));

        assert!(store.take(a).is_some_and(|e| e.complete));
        assert!(store.get(a).is_none());
        assert!(store.take(a).is_none());
        assert_eq!(store.last_index(), Some(b));
        assert_eq!(store.last_open().map(|(i, _)| i), Some(b));

        store.take(b);
        assert_eq!(store.last_index(), Some(b));
        assert!(store.last_open().is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_outstanding_totals() {
        let mut store = EventStore::new();
        let a = store.push(click(0.0));
        let b = store.push(click(1.0));
        store.get_mut(a).unwrap().expect_one();
        store.get_mut(b).unwrap().expect_one();
        store.get_mut(b).unwrap().expect_one();

        assert_eq!(store.outstanding(Some(a)), 1);
        assert_eq!(store.outstanding(Some(b)), 2);
        assert_eq!(store.outstanding(None), 3);
        assert_eq!(store.outstanding(Some(99)), 0);
        assert_eq!(store.open_indices(), vec![a, b]);
    }

    #[test]
    fn test_into_record_keeps_load_end_after_response_end() {
        let mut resource = ResourceRecord::network_call(
            "https://api.example.com/items",
            "GET",
            Initiator::Fetch,
            100.0,
        );
        resource.timing.response_end = Some(180.0);
        resource.timing.load_event_end = Some(175.0);
        let mut event = PendingEvent::new(EventKind::NetworkCall, resource, 100.0);
        event.expect_one();

        let record = event.into_record("01TEST".to_string());
        assert_eq!(record.initiator, "fetch");
        assert_eq!(record.timing.load_event_end, Some(180.0));
        assert_eq!(record.total_resources, 1);
    }
}
