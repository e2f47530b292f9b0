//! Resource and timing records

use super::{EventKind, Initiator, Millis, NodeId};
use serde::{Deserialize, Serialize};

/// Timing fields for a primary or tracked resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTiming {
    pub request_start: Millis,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_start: Option<Millis>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_end: Option<Millis>,

    /// When the last document-tree resource of the event completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_complete: Option<Millis>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_event_end: Option<Millis>,
}

impl ResourceTiming {
    pub fn starting_at(request_start: Millis) -> Self {
        Self {
            request_start,
            ..Default::default()
        }
    }
}

/// An entry from the host's performance timeline.
///
/// Times are relative to the timeline's time origin, as the browser reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub name: String,
    pub start_time: f64,
    #[serde(default)]
    pub response_start: f64,
    #[serde(default)]
    pub response_end: f64,

    /// Size of the response body after content decoding, in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_body_size: Option<u64>,
}

impl TimelineEntry {
    pub fn new(name: impl Into<String>, start_time: f64, response_start: f64, response_end: f64) -> Self {
        Self {
            name: name.into(),
            start_time,
            response_start,
            response_end,
            decoded_body_size: None,
        }
    }

    pub fn with_decoded_body_size(mut self, bytes: u64) -> Self {
        self.decoded_body_size = Some(bytes);
        self
    }

    /// `responseEnd - startTime`, as the resource timing API defines `duration`
    pub fn duration(&self) -> f64 {
        (self.response_end - self.start_time).max(0.0)
    }
}

/// What a tracked resource is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// The click or navigation itself
    Interaction,
    NetworkCall,
    Image,
    Frame,
    Stylesheet,
    /// A caller-controlled wait condition
    Wait,
}

/// How a resource finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceOutcome {
    Loaded,
    Failed,
    /// Removed from the document before it completed
    Detached,
    /// The node was reused for another URL before it completed
    Superseded,
}

impl ResourceOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, ResourceOutcome::Loaded)
    }
}

/// A primary or tracked resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub kind: ResourceKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<Initiator>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ResourceOutcome>,

    pub timing: ResourceTiming,

    /// Raw timeline entry retained by the timing correlator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<TimelineEntry>,
}

impl ResourceRecord {
    pub fn new(kind: ResourceKind, url: Option<String>, request_start: Millis) -> Self {
        Self {
            kind,
            url,
            method: None,
            initiator: None,
            node: None,
            status: None,
            outcome: None,
            timing: ResourceTiming::starting_at(request_start),
            timeline: None,
        }
    }

    pub fn network_call(
        url: impl Into<String>,
        method: impl Into<String>,
        initiator: Initiator,
        request_start: Millis,
    ) -> Self {
        Self {
            method: Some(method.into()),
            initiator: Some(initiator),
            ..Self::new(ResourceKind::NetworkCall, Some(url.into()), request_start)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }
}

/// The consolidated record handed to the transport layer when an event finalizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingRecord {
    /// Unique beacon ID (ULID)
    pub beacon_id: String,

    pub kind: EventKind,

    /// `click`, `xhr`, `fetch`, `spa` or `spa_hard`
    pub initiator: String,

    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// How the primary resource finished, when it is a network call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ResourceOutcome>,

    /// Preempted by a newer navigation before it settled
    #[serde(default)]
    pub aborted: bool,

    pub timing: ResourceTiming,

    /// Lifetime count of resources attached to the event
    pub total_resources: u32,

    #[serde(default)]
    pub resources: Vec<ResourceRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<TimelineEntry>,
}

impl TimingRecord {
    /// Time from request start to the end of the interaction
    pub fn duration(&self) -> Option<Millis> {
        self.timing
            .load_event_end
            .map(|end| (end - self.timing.request_start).max(0.0))
    }

    pub fn new_beacon_id() -> String {
        ulid::Ulid::new().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_duration_never_negative() {
        let entry = TimelineEntry::new("https://api.example.com/a", 120.0, 130.0, 110.0);
        assert_eq!(entry.duration(), 0.0);
        let entry = TimelineEntry::new("https://api.example.com/a", 120.0, 130.0, 170.5);
        assert_eq!(entry.duration(), 50.5);
    }

    #[test]
    fn test_record_duration() {
        let mut record = TimingRecord {
            beacon_id: TimingRecord::new_beacon_id(),
            kind: EventKind::Click,
            initiator: "click".to_string(),
            url: "https://example.com/a.png".to_string(),
            method: None,
            status: None,
            outcome: None,
            aborted: false,
            timing: ResourceTiming::starting_at(1000.0),
            total_resources: 1,
            resources: Vec::new(),
            timeline: None,
        };
        assert_eq!(record.duration(), None);
        record.timing.load_event_end = Some(1040.0);
        assert_eq!(record.duration(), Some(40.0));
    }

    #[test]
    fn test_resource_record_serialization_skips_empty_fields() {
        let record = ResourceRecord::network_call("https://api.example.com/x", "POST", Initiator::Fetch, 5.0);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"network_call\""));
        assert!(json.contains("\"initiator\":\"fetch\""));
        assert!(!json.contains("timeline"));
        assert!(!json.contains("outcome"));
    }
}
