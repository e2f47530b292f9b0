//! Resource timing correlation
//!
//! Network-call callbacks only give wall-clock times. When the performance
//! timeline has an entry for the same URL, its timestamps replace them.

use settle_core::host::PerformanceTimeline;
use serde::Serialize;
use settle_core::model::{Millis, ResourceRecord, TimelineEntry};
use tracing::{debug, warn};

/// Outcome of a correlation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Correlation {
    Matched,
    /// No plausible entry; wall-clock times stand
    Miss,
}

#[derive(Debug, Clone)]
pub struct TimingCorrelator {
    /// How far an entry may start before the recorded request start
    tolerance_ms: Millis,
}

impl TimingCorrelator {
    pub fn new(tolerance_ms: Millis) -> Self {
        Self { tolerance_ms }
    }

    /// Pick the entry that most plausibly belongs to a request recorded at
    /// `request_start`. Entry times are converted with `origin`.
    pub fn select<'a>(
        &self,
        entries: &'a [TimelineEntry],
        origin: Millis,
        request_start: Millis,
    ) -> Option<&'a TimelineEntry> {
        entries
            .iter()
            .filter(|e| e.response_end > 0.0)
            .filter(|e| origin + e.start_time >= request_start - self.tolerance_ms)
            .min_by(|a, b| {
                let da = (origin + a.start_time - request_start).abs();
                let db = (origin + b.start_time - request_start).abs();
                da.total_cmp(&db)
                    .then_with(|| a.response_end.total_cmp(&b.response_end))
            })
    }

    /// Overwrite the record's timestamps from the timeline, if an entry fits
    pub fn correlate(
        &self,
        timeline: &dyn PerformanceTimeline,
        record: &mut ResourceRecord,
    ) -> Correlation {
        let url = match record.url.as_deref() {
            Some(url) => url,
            None => return Correlation::Miss,
        };

        let entries = match timeline.query_by_url(url) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Timeline query for {} failed: {}", url, e);
                return Correlation::Miss;
            }
        };

        let origin = timeline.time_origin();
        let entry = match self.select(&entries, origin, record.timing.request_start) {
            Some(entry) => entry.clone(),
            None => {
                debug!("No timeline entry for {} ({} candidates)", url, entries.len());
                return Correlation::Miss;
            }
        };

        let timing = &mut record.timing;
        timing.request_start = origin + entry.start_time;
        if entry.response_start > 0.0 {
            timing.response_start = Some(origin + entry.response_start);
        }
        let response_end = origin + entry.response_end;
        timing.response_end = Some(response_end);
        timing.load_event_end = Some(
            timing
                .load_event_end
                .map_or(response_end, |end| end.max(response_end)),
        );
        record.timeline = Some(entry);

        Correlation::Matched
    }
}

impl Default for TimingCorrelator {
    fn default() -> Self {
        Self::new(5.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_core::host::{EmptyTimeline, HostError, HostResult, StaticTimeline};
    use settle_core::model::Initiator;

    const URL: &str = "https://api.example.com/items";

    fn call(request_start: Millis, load_end: Millis) -> ResourceRecord {
        let mut record = ResourceRecord::network_call(URL, "GET", Initiator::Xhr, request_start);
        record.timing.response_end = Some(load_end - 1.0);
        record.timing.load_event_end = Some(load_end);
        record
    }

    #[test]
    fn test_overwrites_with_timeline_values() {
        let timeline = StaticTimeline::new(10_000.0);
        timeline.push(TimelineEntry::new(URL, 100.5, 150.25, 180.75));

        let mut record = call(10_100.0, 10_185.0);
        let result = TimingCorrelator::default().correlate(&timeline, &mut record);

        assert_eq!(result, Correlation::Matched);
        assert_eq!(record.timing.request_start, 10_100.5);
        assert_eq!(record.timing.response_start, Some(10_150.25));
        assert_eq!(record.timing.response_end, Some(10_180.75));
        assert_eq!(record.timing.load_event_end, Some(10_185.0));
        assert!(record.timeline.is_some());
    }

    #[test]
    fn test_load_end_raised_to_response_end() {
        let timeline = StaticTimeline::new(0.0);
        timeline.push(TimelineEntry::new(URL, 100.0, 150.0, 240.0));

        let mut record = call(100.0, 200.0);
        TimingCorrelator::default().correlate(&timeline, &mut record);

        let timing = &record.timing;
        assert!(timing.load_event_end.unwrap() >= timing.response_end.unwrap());
        assert_eq!(timing.load_event_end, Some(240.0));
    }

    #[test]
    fn test_skips_implausible_entries() {
        let timeline = StaticTimeline::new(0.0);
        // an earlier request for the same URL
        timeline.push(TimelineEntry::new(URL, 20.0, 30.0, 40.0));
        // still in flight
        timeline.push(TimelineEntry::new(URL, 101.0, 0.0, 0.0));

        let mut record = call(100.0, 200.0);
        let before = record.clone();
        let result = TimingCorrelator::default().correlate(&timeline, &mut record);

        assert_eq!(result, Correlation::Miss);
        assert_eq!(record, before);
    }

    #[test]
    fn test_prefers_entry_closest_to_request_start() {
        let entries = vec![
            TimelineEntry::new(URL, 400.0, 410.0, 420.0),
            TimelineEntry::new(URL, 98.0, 110.0, 130.0),
            TimelineEntry::new(URL, 250.0, 260.0, 270.0),
        ];
        let chosen = TimingCorrelator::new(5.0).select(&entries, 0.0, 100.0).unwrap();
        assert_eq!(chosen.start_time, 98.0);

        let strict = TimingCorrelator::new(0.0).select(&entries, 0.0, 100.0).unwrap();
        assert_eq!(strict.start_time, 250.0);
    }

    #[test]
    fn test_miss_without_entries() {
        let mut record = call(100.0, 200.0);
        assert_eq!(
            TimingCorrelator::default().correlate(&EmptyTimeline, &mut record),
            Correlation::Miss
        );
        assert!(record.timeline.is_none());
    }

    struct BrokenTimeline;

    impl PerformanceTimeline for BrokenTimeline {
        fn query_by_url(&self, _url: &str) -> HostResult<Vec<TimelineEntry>> {
            Err(HostError::TimelineUnavailable("buffer full".to_string()))
        }
    }

    #[test]
    fn test_timeline_failure_is_a_miss() {
        let mut record = call(100.0, 200.0);
        assert_eq!(
            TimingCorrelator::default().correlate(&BrokenTimeline, &mut record),
            Correlation::Miss
        );
    }
}
