//! Exporters for Settle timing records

pub mod apm;
pub mod channel;
pub mod exporter;
pub mod jsonl;
pub mod memory;

pub use apm::{ApmMetrics, ApmTrace};
pub use channel::{channel, run_export_loop, ChannelSink, ExportStats};
pub use exporter::{BeaconExporter, ExportError, ExportResult};
pub use jsonl::{JsonlExporter, JsonlExporterConfig};
pub use memory::MemorySink;
