//! Engine counters

use serde::Serialize;

/// Running totals kept by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Events pushed onto the store
    pub events_opened: u64,
    /// Network calls folded into an open event
    pub calls_merged: u64,
    /// Network calls finalized on their own
    pub calls_standalone: u64,
    /// Initiating signals that opened nothing
    pub signals_ignored: u64,
    /// Events handed to the emit path
    pub events_finalized: u64,
    /// Events finalized early because a newer navigation began
    pub events_aborted: u64,
    /// Events dropped without a record
    pub events_discarded: u64,
    /// Nodes accepted by the filter and watched
    pub resources_watched: u64,
    /// Watched nodes removed from the document before completing
    pub resources_detached: u64,
    /// Completions reported twice for the same slot
    pub duplicate_completions: u64,
    /// Listener attach failures
    pub listener_failures: u64,
    pub correlations_matched: u64,
    pub correlations_missed: u64,
    /// Records accepted by the sink
    pub records_emitted: u64,
    /// Records that waited on a closed emit gate
    pub records_deferred: u64,
    pub delivery_failures: u64,
}

impl EngineStats {
    /// Export counters in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        let counters: [(&str, &str, u64); 16] = [
            ("events_opened", "Pending events opened", self.events_opened),
            ("calls_merged", "Network calls merged into an open event", self.calls_merged),
            ("calls_standalone", "Network calls finalized individually", self.calls_standalone),
            ("signals_ignored", "Initiating signals ignored", self.signals_ignored),
            ("events_finalized", "Events finalized", self.events_finalized),
            ("events_aborted", "Events aborted by a newer navigation", self.events_aborted),
            ("events_discarded", "Events discarded silently", self.events_discarded),
            ("resources_watched", "Document resources watched", self.resources_watched),
            ("resources_detached", "Watched resources removed before completion", self.resources_detached),
            ("duplicate_completions", "Repeated completions ignored", self.duplicate_completions),
            ("listener_failures", "Listener attach failures", self.listener_failures),
            ("correlations_matched", "Network calls matched on the performance timeline", self.correlations_matched),
            ("correlations_missed", "Network calls left with wall-clock timing", self.correlations_missed),
            ("records_emitted", "Timing records delivered", self.records_emitted),
            ("records_deferred", "Timing records queued behind the emit gate", self.records_deferred),
            ("delivery_failures", "Timing record deliveries that failed", self.delivery_failures),
        ];

        for (name, help, value) in counters {
            output.push_str(&format!("# HELP settle_{}_total {}\n", name, help));
            output.push_str(&format!("# TYPE settle_{}_total counter\n", name));
            output.push_str(&format!("settle_{}_total {}\n\n", name, value));
        }

        output
    }
}
