//! Storage backend trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{AlertRow, ControlRow, MachineDataRow, RecordBatch};

/// Query parameters for fetching machine data within a time range
#[derive(Debug, Clone)]
pub struct QueryRange {
    pub machine_id: String,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (inclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for audit storage backends
///
/// Implementations must be `Send + Sync`; the storage actor owns one as a trait object and the
/// gateway never talks to it directly. Query results are ordered oldest first.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn insert_machine_data(&self, rows: Vec<MachineDataRow>) -> StorageResult<()>;

    async fn insert_controls(&self, rows: Vec<ControlRow>) -> StorageResult<()>;

    async fn insert_alerts(&self, rows: Vec<AlertRow>) -> StorageResult<()>;

    /// Write a mixed batch. Tables are written independently; the first failure is returned
    /// after every table has been attempted.
    async fn insert_batch(&self, batch: RecordBatch) -> StorageResult<()> {
        let RecordBatch {
            machine_data,
            controls,
            alerts,
        } = batch;

        let results = [
            self.insert_machine_data(machine_data).await,
            self.insert_controls(controls).await,
            self.insert_alerts(alerts).await,
        ];

        results.into_iter().collect::<StorageResult<Vec<()>>>()?;
        Ok(())
    }

    async fn query_machine_data(&self, query: QueryRange) -> StorageResult<Vec<MachineDataRow>>;

    async fn query_latest_machine_data(
        &self,
        machine_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<MachineDataRow>>;

    async fn query_latest_controls(
        &self,
        machine_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<ControlRow>>;

    async fn query_latest_alerts(
        &self,
        machine_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<AlertRow>>;

    /// Delete records of every kind older than `before`, returning how many went
    async fn cleanup_old_records(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Lightweight operation verifying the backend is usable
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Human-readable summary, e.g. "SQLite: 1200 rows, 0.45 MB on disk"
    async fn get_stats(&self) -> StorageResult<String>;

    /// Release resources. Pending writes are the caller's responsibility.
    async fn close(&self) -> StorageResult<()>;
}
