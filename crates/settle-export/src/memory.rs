//! In-memory sink for tests and dry runs

use parking_lot::Mutex;
use settle_core::host::{BeaconSink, HostResult};
use settle_core::model::TimingRecord;
use std::sync::Arc;

/// Collects delivered records; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<TimingRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything delivered so far
    pub fn records(&self) -> Vec<TimingRecord> {
        self.records.lock().clone()
    }

    /// Remove and return everything delivered so far
    pub fn take(&self) -> Vec<TimingRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl BeaconSink for MemorySink {
    fn deliver(&mut self, record: TimingRecord) -> HostResult<()> {
        self.records.lock().push(record);
        Ok(())
    }
}
