//! Activity correlation engine
//!
//! Infers interaction boundaries by correlating clicks, network calls and
//! in-page navigations with the document changes they cause, and produces one
//! timing record per logical user action.
//!
//! - **Filter**: which nodes are resources worth waiting for
//! - **Tracker**: node identity to event slot side-table
//! - **Timing**: refines network call timing from the performance timeline
//! - **Store**: append-only pending events
//! - **Timer**: idle/settle timeout and emit retry deadlines
//! - **Engine**: the orchestrator

pub mod engine;
pub mod error;
pub mod filter;
pub mod stats;
pub mod store;
pub mod timer;
pub mod timing;
pub mod tracker;

pub use engine::{Collaborators, Engine, IgnoreReason, Input, Transition};
pub use error::{CorrelateError, CorrelateResult};
pub use filter::{ResourceFilter, UrlExclusions};
pub use stats::EngineStats;
pub use timing::{Correlation, TimingCorrelator};
