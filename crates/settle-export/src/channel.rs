//! Channel hand-off between the engine and async exporters
//!
//! The engine delivers synchronously; [`ChannelSink`] pushes records onto a
//! bounded tokio channel and [`run_export_loop`] fans them out to exporters.

use crate::exporter::BeaconExporter;
use settle_core::host::{BeaconSink, HostError, HostResult};
use settle_core::model::TimingRecord;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Engine-side end of the export channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<TimingRecord>,
}

/// Create a sink and the receiver that feeds `run_export_loop`
pub fn channel(buffer_size: usize) -> (ChannelSink, mpsc::Receiver<TimingRecord>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (ChannelSink { tx }, rx)
}

impl BeaconSink for ChannelSink {
    fn deliver(&mut self, record: TimingRecord) -> HostResult<()> {
        self.tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(r) => {
                HostError::Delivery(format!("export channel full, dropped {}", r.beacon_id))
            }
            mpsc::error::TrySendError::Closed(r) => {
                HostError::Delivery(format!("export channel closed, dropped {}", r.beacon_id))
            }
        })
    }
}

/// Counters from one export loop run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub records_received: u64,
    pub export_failures: u64,
}

/// Drain `rx` into every exporter until all senders are dropped, then flush
pub async fn run_export_loop(
    mut rx: mpsc::Receiver<TimingRecord>,
    exporters: Vec<Arc<dyn BeaconExporter>>,
) -> ExportStats {
    let mut stats = ExportStats::default();

    while let Some(record) = rx.recv().await {
        stats.records_received += 1;
        for exporter in &exporters {
            if let Err(e) = exporter.export(&record).await {
                debug!("Exporter {} failed: {}", exporter.name(), e);
                stats.export_failures += 1;
            }
        }
    }

    for exporter in &exporters {
        if let Err(e) = exporter.flush().await {
            debug!("Exporter {} failed to flush: {}", exporter.name(), e);
        }
    }

    info!(
        "Export loop finished: {} records, {} failures",
        stats.records_received, stats.export_failures
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::{ExportError, ExportResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use settle_core::model::{EventKind, ResourceTiming};

    fn record(url: &str) -> TimingRecord {
        TimingRecord {
            beacon_id: TimingRecord::new_beacon_id(),
            kind: EventKind::Click,
            initiator: "click".to_string(),
            url: url.to_string(),
            method: None,
            status: None,
            outcome: None,
            aborted: false,
            timing: ResourceTiming::starting_at(0.0),
            total_resources: 1,
            resources: Vec::new(),
            timeline: None,
        }
    }

    #[derive(Default)]
    struct Collecting {
        urls: Mutex<Vec<String>>,
        flushed: Mutex<bool>,
    }

    #[async_trait]
    impl BeaconExporter for Collecting {
        fn name(&self) -> &str {
            "collecting"
        }

        async fn export(&self, record: &TimingRecord) -> ExportResult<()> {
            self.urls.lock().push(record.url.clone());
            Ok(())
        }

        async fn flush(&self) -> ExportResult<()> {
            *self.flushed.lock() = true;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl BeaconExporter for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn export(&self, _record: &TimingRecord) -> ExportResult<()> {
            Err(ExportError::OperationFailed("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_loop_fans_out_in_order() {
        let (mut sink, rx) = channel(8);
        let collecting = Arc::new(Collecting::default());
        let exporters: Vec<Arc<dyn BeaconExporter>> = vec![
            collecting.clone() as Arc<dyn BeaconExporter>,
            Arc::new(Failing) as Arc<dyn BeaconExporter>,
        ];
        let handle = tokio::spawn(run_export_loop(rx, exporters));

        sink.deliver(record("https://cdn.example.com/a.png")).unwrap();
        sink.deliver(record("https://cdn.example.com/b.png")).unwrap();
        drop(sink);

        let stats = handle.await.unwrap();
        assert_eq!(stats.records_received, 2);
        assert_eq!(stats.export_failures, 2);
        assert_eq!(
            *collecting.urls.lock(),
            vec!["https://cdn.example.com/a.png", "https://cdn.example.com/b.png"]
        );
        assert!(*collecting.flushed.lock());
    }

    #[test]
    fn test_full_channel_reports_delivery_error() {
        let (mut sink, _rx) = channel(1);
        sink.deliver(record("https://cdn.example.com/a.png")).unwrap();
        let err = sink.deliver(record("https://cdn.example.com/b.png")).unwrap_err();
        assert!(matches!(err, HostError::Delivery(_)));
    }

    #[test]
    fn test_closed_channel_reports_delivery_error() {
        let (mut sink, rx) = channel(4);
        drop(rx);
        assert!(sink.deliver(record("https://cdn.example.com/a.png")).is_err());
    }
}
