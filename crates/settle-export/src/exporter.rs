//! Exporter trait and errors

use async_trait::async_trait;
use settle_core::model::TimingRecord;
use thiserror::Error;

/// Exporter errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Exporter initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Export failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Destination for finalized timing records
#[async_trait]
pub trait BeaconExporter: Send + Sync {
    fn name(&self) -> &str;

    /// Export one record
    async fn export(&self, record: &TimingRecord) -> ExportResult<()>;

    /// Export multiple records
    async fn export_batch(&self, records: &[TimingRecord]) -> ExportResult<()> {
        for record in records {
            self.export(record).await?;
        }
        Ok(())
    }

    /// Flush any buffered records
    async fn flush(&self) -> ExportResult<()> {
        Ok(())
    }
}
