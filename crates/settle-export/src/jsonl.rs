//! JSONL file exporter

use crate::apm::ApmTrace;
use crate::exporter::{BeaconExporter, ExportError, ExportResult};
use async_trait::async_trait;
use settle_core::config::{ExportFormat, ExportSettings};
use settle_core::model::TimingRecord;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// JSONL exporter configuration
#[derive(Debug, Clone)]
pub struct JsonlExporterConfig {
    /// Output file path
    pub path: PathBuf,

    /// Whether to append to existing file
    pub append: bool,

    /// Flush after each write
    pub flush_each: bool,

    /// Raw records or APM traces
    pub format: ExportFormat,
}

impl Default for JsonlExporterConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/settle-beacons.jsonl"),
            append: true,
            flush_each: true,
            format: ExportFormat::Beacon,
        }
    }
}

impl JsonlExporterConfig {
    /// Build from the `[export]` section; `None` when no path is configured
    pub fn from_settings(settings: &ExportSettings) -> Option<Self> {
        settings.path.as_ref().map(|path| Self {
            path: PathBuf::from(path),
            append: settings.append,
            flush_each: settings.flush_each,
            format: settings.format,
        })
    }
}

/// JSONL file exporter
pub struct JsonlExporter {
    config: JsonlExporterConfig,
    writer: Mutex<BufWriter<File>>,
    records_written: AtomicU64,
}

impl JsonlExporter {
    /// Open (or create) the output file
    pub fn new(config: JsonlExporterConfig) -> ExportResult<Self> {
        let file = if config.append {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.path)?
        } else {
            File::create(&config.path)?
        };
        info!("JSONL exporter writing to: {:?}", config.path);

        Ok(Self {
            config,
            writer: Mutex::new(BufWriter::new(file)),
            records_written: AtomicU64::new(0),
        })
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    fn line(&self, record: &TimingRecord) -> ExportResult<Option<String>> {
        match self.config.format {
            ExportFormat::Beacon => Ok(Some(serde_json::to_string(record)?)),
            ExportFormat::Apm => match ApmTrace::from_record(record) {
                Some(trace) => Ok(Some(serde_json::to_string(&trace)?)),
                None => {
                    debug!("No APM trace for {} record {}", record.initiator, record.beacon_id);
                    Ok(None)
                }
            },
        }
    }
}

#[async_trait]
impl BeaconExporter for JsonlExporter {
    fn name(&self) -> &str {
        "jsonl-exporter"
    }

    async fn export(&self, record: &TimingRecord) -> ExportResult<()> {
        let Some(json) = self.line(record)? else {
            return Ok(());
        };

        let mut w = self
            .writer
            .lock()
            .map_err(|e| ExportError::OperationFailed(format!("Lock poisoned: {}", e)))?;

        writeln!(w, "{}", json)?;

        if self.config.flush_each {
            w.flush()?;
        }

        self.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self) -> ExportResult<()> {
        let mut w = self
            .writer
            .lock()
            .map_err(|e| ExportError::OperationFailed(format!("Lock poisoned: {}", e)))?;
        w.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_core::model::{EventKind, ResourceTiming};
    use tempfile::tempdir;

    fn record(initiator: &str, kind: EventKind) -> TimingRecord {
        let mut timing = ResourceTiming::starting_at(1_000.0);
        timing.load_event_end = Some(1_040.0);
        TimingRecord {
            beacon_id: TimingRecord::new_beacon_id(),
            kind,
            initiator: initiator.to_string(),
            url: "https://api.example.com/items".to_string(),
            method: None,
            status: Some(200),
            outcome: None,
            aborted: false,
            timing,
            total_resources: 1,
            resources: Vec::new(),
            timeline: None,
        }
    }

    #[tokio::test]
    async fn test_writes_one_line_per_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beacons.jsonl");
        let exporter = JsonlExporter::new(JsonlExporterConfig {
            path: path.clone(),
            append: false,
            ..Default::default()
        })
        .unwrap();

        let records = vec![record("click", EventKind::Click), record("xhr", EventKind::NetworkCall)];
        exporter.export_batch(&records).await.unwrap();
        exporter.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: TimingRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, records[0]);
        assert_eq!(exporter.records_written(), 2);
    }

    #[tokio::test]
    async fn test_apm_format_skips_clicks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("traces.jsonl");
        let exporter = JsonlExporter::new(JsonlExporterConfig {
            path: path.clone(),
            append: false,
            flush_each: true,
            format: ExportFormat::Apm,
        })
        .unwrap();

        exporter.export(&record("click", EventKind::Click)).await.unwrap();
        exporter.export(&record("fetch", EventKind::NetworkCall)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        let trace: ApmTrace = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(trace.name, "api.example.com/items");
        assert_eq!(exporter.records_written(), 1);
    }

    #[tokio::test]
    async fn test_append_keeps_existing_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beacons.jsonl");
        std::fs::write(&path, "{\"existing\":true}\n").unwrap();

        let exporter = JsonlExporter::new(JsonlExporterConfig {
            path: path.clone(),
            ..Default::default()
        })
        .unwrap();
        exporter.export(&record("xhr", EventKind::NetworkCall)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_config_from_settings() {
        assert!(JsonlExporterConfig::from_settings(&ExportSettings::default()).is_none());

        let settings = ExportSettings {
            path: Some("/var/log/settle.jsonl".to_string()),
            append: false,
            format: ExportFormat::Apm,
            ..Default::default()
        };
        let config = JsonlExporterConfig::from_settings(&settings).unwrap();
        assert_eq!(config.path, PathBuf::from("/var/log/settle.jsonl"));
        assert!(!config.append);
        assert_eq!(config.format, ExportFormat::Apm);
    }
}
