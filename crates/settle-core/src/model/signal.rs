//! Interaction-initiating signals

use super::{CallId, EventIndex, Millis, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What started a network call, as reported by the interception layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    Click,
    Xhr,
    Fetch,
    Navigation,
}

impl Initiator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Initiator::Click => "click",
            Initiator::Xhr => "xhr",
            Initiator::Fetch => "fetch",
            Initiator::Navigation => "navigation",
        }
    }
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of pending event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Click,
    NetworkCall,
    SoftNavigation,
    HardNavigation,
}

impl EventKind {
    pub fn is_navigation(&self) -> bool {
        matches!(self, EventKind::SoftNavigation | EventKind::HardNavigation)
    }

    /// Initiator label carried on the beacon for this kind of event.
    ///
    /// Network calls report the initiator the interception layer saw.
    pub fn beacon_initiator(&self, call_initiator: Option<Initiator>) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::NetworkCall => call_initiator.unwrap_or(Initiator::Xhr).as_str(),
            EventKind::SoftNavigation => "spa",
            EventKind::HardNavigation => "spa_hard",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Click => "click",
            EventKind::NetworkCall => "network-call",
            EventKind::SoftNavigation => "soft-navigation",
            EventKind::HardNavigation => "hard-navigation",
        };
        f.write_str(s)
    }
}

/// A user click
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClickSignal {
    /// Node that received the click
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<NodeId>,
}

/// An outgoing network call (XHR or fetch)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkCallSignal {
    /// Interception-layer identifier, echoed back on response and settle
    pub call_id: CallId,

    /// HTTP method
    #[serde(default = "default_method")]
    pub method: String,

    /// Absolute request URL
    pub url: String,

    /// What initiated the call
    #[serde(default = "default_initiator")]
    pub initiator: Initiator,

    /// When the request was sent (defaults to the time the signal is delivered)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_start: Option<Millis>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_initiator() -> Initiator {
    Initiator::Xhr
}

impl NetworkCallSignal {
    pub fn new(call_id: CallId, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            call_id,
            method: method.into(),
            url: url.into(),
            initiator: Initiator::Xhr,
            request_start: None,
        }
    }

    pub fn with_initiator(mut self, initiator: Initiator) -> Self {
        self.initiator = initiator;
        self
    }

    pub fn with_request_start(mut self, at: Millis) -> Self {
        self.request_start = Some(at);
        self
    }
}

/// Navigation flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationKind {
    /// In-page route change
    Soft,
    /// Initial page load of a single-page app
    Hard,
}

/// A soft or hard navigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationSignal {
    pub kind: NavigationKind,

    /// URL of the route being navigated to
    pub url: String,

    /// Navigation start (defaults to the time the signal is delivered)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_start: Option<Millis>,

    /// Whether the caller will report completion through `wait_complete`
    #[serde(default)]
    pub wait: bool,
}

impl NavigationSignal {
    pub fn soft(url: impl Into<String>) -> Self {
        Self {
            kind: NavigationKind::Soft,
            url: url.into(),
            request_start: None,
            wait: false,
        }
    }

    pub fn hard(url: impl Into<String>) -> Self {
        Self {
            kind: NavigationKind::Hard,
            ..Self::soft(url)
        }
    }

    pub fn waiting(mut self) -> Self {
        self.wait = true;
        self
    }
}

/// Anything that may open a pending event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum InitiatingSignal {
    Click(ClickSignal),
    NetworkCall(NetworkCallSignal),
    Navigation(NavigationSignal),
}

impl InitiatingSignal {
    pub fn kind(&self) -> EventKind {
        match self {
            InitiatingSignal::Click(_) => EventKind::Click,
            InitiatingSignal::NetworkCall(_) => EventKind::NetworkCall,
            InitiatingSignal::Navigation(nav) => match nav.kind {
                NavigationKind::Soft => EventKind::SoftNavigation,
                NavigationKind::Hard => EventKind::HardNavigation,
            },
        }
    }
}

/// How a network call ended
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_start: Option<Millis>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_end: Option<Millis>,

    /// HTTP status, if the call produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// How a watched node reported completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded,
    Failed,
}

/// Where a tracked resource lives, returned by `add_resource_to_event`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceTag {
    pub event: EventIndex,
    pub slot: usize,
}
