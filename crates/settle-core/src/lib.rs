//! Settle Core - Signal types, host traits, and configuration
//!
//! This crate provides the foundational types shared by the Settle crates:
//!
//! - **Model**: initiating signals, document-tree snapshots, timing records
//! - **Host**: trait definitions for the collaborators the engine talks to
//! - **Config**: TOML configuration with environment overrides

pub mod config;
pub mod host;
pub mod model;

// Re-export commonly used types
pub use config::{ConfigLoader, SettleConfig};
pub use host::{BeaconSink, DocumentHost, EmitGate, HostError, HostResult, PerformanceTimeline};
pub use model::{
    CallId, EventIndex, EventKind, InitiatingSignal, Initiator, Millis, MutationRecord, NodeId,
    NodeSnapshot, ResourceRecord, ResourceTiming, TimelineEntry, TimingRecord,
};

/// SDK version
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
