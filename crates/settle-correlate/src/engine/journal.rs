//! Engine inputs and the transition journal

use crate::timing::Correlation;
use serde::{Deserialize, Serialize};
use settle_core::model::{
    CallId, CallOutcome, ClickSignal, EventIndex, EventKind, LoadOutcome, Millis, MutationRecord,
    NavigationSignal, NetworkCallSignal, NodeId, ResourceOutcome, ResourceTag,
};

/// One host notification, as fed to `Engine::step`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Input {
    Click(ClickSignal),
    NetworkCall(NetworkCallSignal),
    Navigation(NavigationSignal),
    NetworkResponseStarted {
        call_id: CallId,
    },
    NetworkCallSettled {
        call_id: CallId,
        #[serde(default)]
        outcome: CallOutcome,
    },
    Mutations {
        records: Vec<MutationRecord>,
    },
    NodeSettled {
        node: NodeId,
        outcome: LoadOutcome,
    },
    WaitComplete {
        event: EventIndex,
    },
    /// Only let time pass
    Tick,
}

/// Why an initiating signal opened nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// A click while a network call is still the latest event
    ClickDuringNetworkCall,
    EmptyUrl,
    ExcludedUrl,
}

/// Everything the engine did, in order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    Ignored {
        kind: EventKind,
        reason: IgnoreReason,
    },
    Opened {
        event: EventIndex,
        kind: EventKind,
    },
    /// A resource or network call joined an open event
    Merged {
        tag: ResourceTag,
    },
    /// A network call tracked outside the store
    Standalone {
        call_id: CallId,
    },
    Watched {
        tag: ResourceTag,
        node: NodeId,
        url: String,
    },
    ListenerFailed {
        node: NodeId,
    },
    SlotClosed {
        tag: ResourceTag,
        outcome: ResourceOutcome,
    },
    DuplicateCompletion {
        node: NodeId,
    },
    Correlated {
        call_id: CallId,
        correlation: Correlation,
    },
    Completed {
        event: EventIndex,
        remaining: u32,
    },
    MutationsSkipped {
        event: EventIndex,
    },
    Armed {
        event: EventIndex,
        deadline: Millis,
    },
    Discarded {
        event: EventIndex,
    },
    Aborted {
        event: EventIndex,
    },
    Finalized {
        event: Option<EventIndex>,
        kind: EventKind,
        beacon_id: String,
    },
    Emitted {
        beacon_id: String,
    },
    Deferred {
        beacon_id: String,
        queued: usize,
        retry_at: Millis,
    },
    DeliveryFailed {
        beacon_id: String,
    },
}
