//! APM network traces
//!
//! Collectors that ingest application performance traces get one `network`
//! trace per network-call or navigation record. Click records have no trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settle_core::model::{EventKind, TimingRecord};

/// Initiators reported as network traces
const NETWORK_INITIATORS: [&str; 4] = ["xhr", "fetch", "spa", "spa_hard"];

/// Reported for calls that failed without an HTTP status
pub const STATUS_ERROR: i32 = -998;

/// Reported for calls cut off before they settled
pub const STATUS_ABORT: i32 = -999;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApmMetrics {
    /// Milliseconds from request start to response
    pub response_time: f64,

    /// Decoded body size from the matched timeline entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_payload_size: Option<u64>,

    /// HTTP status, 200 when unknown, or a negative error code
    pub response_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApmTrace {
    #[serde(rename = "type")]
    pub trace_type: String,

    /// URL without scheme and query
    pub name: String,

    /// Start, epoch milliseconds
    pub stz: i64,

    /// End, epoch milliseconds
    pub etz: i64,

    pub apm_metrics: ApmMetrics,
}

impl ApmTrace {
    /// Project a record to a trace; `None` for records that are not network
    /// activity.
    pub fn from_record(record: &TimingRecord) -> Option<Self> {
        if !NETWORK_INITIATORS.contains(&record.initiator.as_str()) {
            return None;
        }

        let timing = &record.timing;
        let end = timing.load_event_end.unwrap_or(timing.request_start);
        let response_time = match (&record.timeline, timing.response_start) {
            (Some(entry), _) if entry.duration() > 0.0 => entry.duration(),
            (_, Some(first_byte)) => (first_byte - timing.request_start).max(0.0),
            _ => (end - timing.request_start).max(0.0),
        };

        Some(Self {
            trace_type: "network".to_string(),
            name: trace_name(&record.url),
            stz: timing.request_start.round() as i64,
            etz: end.round() as i64,
            apm_metrics: ApmMetrics {
                response_time,
                response_payload_size: record
                    .timeline
                    .as_ref()
                    .and_then(|entry| entry.decoded_body_size),
                response_code: response_code(record),
            },
        })
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.stz)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.etz)
    }
}

fn response_code(record: &TimingRecord) -> i32 {
    match record.status {
        Some(status) => i32::from(status),
        None if record.outcome.is_some_and(|o| o.is_failure()) => STATUS_ERROR,
        None if record.aborted && record.kind == EventKind::NetworkCall => STATUS_ABORT,
        None => 200,
    }
}

/// `https://host/path?q=1` -> `host/path`
fn trace_name(url: &str) -> String {
    let without_scheme = url.rsplit("//").next().unwrap_or(url);
    without_scheme
        .split('?')
        .next()
        .unwrap_or(without_scheme)
        .to_string()
}
