//! StorageActor - Persists audit records
//!
//! The gateway hands records to a [`StorageHandle`], which pushes them onto a bounded queue
//! without waiting. A full queue drops the record (logged) rather than stalling the control
//! loop.
//!
//! ## Batching Strategy
//!
//! Records are buffered and written in batches:
//! - **Size trigger**: flush after 100 records
//! - **Time trigger**: flush every 5 seconds
//!
//! A failed batch is logged and dropped; nothing is retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{StorageCommand, StorageStats};
use crate::storage::{
    AlertRow, AuditRecord, ControlRow, MachineDataRow, QueryRange, RecordBatch, StorageBackend,
    StorageError, StorageResult,
};

/// Records that may wait for the actor before new ones are dropped
const RECORD_QUEUE_CAPACITY: usize = 1024;

/// Batch size trigger - flush after this many records
const BATCH_SIZE_TRIGGER: usize = 100;

/// Batch time trigger - flush after this duration
const BATCH_TIME_TRIGGER: Duration = Duration::from_secs(5);

/// Cleanup interval - run retention cleanup daily
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct StorageActor {
    backend: Box<dyn StorageBackend>,

    /// Records waiting to be flushed
    batch_buffer: Vec<AuditRecord>,

    record_rx: mpsc::Receiver<AuditRecord>,

    command_rx: mpsc::Receiver<StorageCommand>,

    /// Retention period in days, `None` disables cleanup
    retention_days: Option<u32>,

    flush_count: u64,

    records_written: u64,

    /// Shared with the handles, which count queue overflows
    records_dropped: Arc<AtomicU64>,
}

impl StorageActor {
    pub fn new(
        backend: Box<dyn StorageBackend>,
        record_rx: mpsc::Receiver<AuditRecord>,
        command_rx: mpsc::Receiver<StorageCommand>,
        retention_days: Option<u32>,
        records_dropped: Arc<AtomicU64>,
    ) -> Self {
        if let Some(days) = retention_days {
            debug!("retention cleanup enabled: {} days", days);
        }

        Self {
            backend,
            batch_buffer: Vec::with_capacity(BATCH_SIZE_TRIGGER),
            record_rx,
            command_rx,
            retention_days,
            flush_count: 0,
            records_written: 0,
            records_dropped,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting storage actor");

        let mut flush_interval =
            time::interval_at(time::Instant::now() + BATCH_TIME_TRIGGER, BATCH_TIME_TRIGGER);
        // First tick is immediate, so retention runs once on startup
        let mut cleanup_interval = time::interval(CLEANUP_INTERVAL);
        let has_retention = self.retention_days.is_some();

        loop {
            tokio::select! {
                Some(record) = self.record_rx.recv() => {
                    self.store(record).await;
                }

                _ = flush_interval.tick() => {
                    if !self.batch_buffer.is_empty() {
                        trace!("time-based flush triggered ({} records)", self.batch_buffer.len());
                        let _ = self.flush_batch().await;
                    }
                }

                _ = cleanup_interval.tick(), if has_retention => {
                    debug!("retention cleanup triggered");
                    self.run_cleanup().await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(StorageCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        // Records queued before the shutdown still go out
        self.drain_queue();

        if !self.batch_buffer.is_empty() {
            debug!(
                "final flush before shutdown ({} records)",
                self.batch_buffer.len()
            );
            let _ = self.flush_batch().await;
        }

        if let Err(e) = self.backend.close().await {
            error!("error closing backend: {}", e);
        }

        debug!("storage actor stopped");
    }

    /// Move everything already queued into the buffer
    fn drain_queue(&mut self) {
        while let Ok(record) = self.record_rx.try_recv() {
            self.batch_buffer.push(record);
        }
    }

    async fn store(&mut self, record: AuditRecord) {
        trace!(
            "buffering record for {} at {}",
            record.machine_id(),
            record.timestamp()
        );

        self.batch_buffer.push(record);

        if self.batch_buffer.len() >= BATCH_SIZE_TRIGGER {
            trace!(
                "size-based flush triggered ({} records)",
                self.batch_buffer.len()
            );
            let _ = self.flush_batch().await;
        }
    }

    /// Write the buffer to the backend. On failure the batch is counted as dropped.
    async fn flush_batch(&mut self) -> StorageResult<()> {
        if self.batch_buffer.is_empty() {
            return Ok(());
        }

        let batch: RecordBatch = self.batch_buffer.drain(..).collect();
        let batch_size = batch.len() as u64;
        debug!("flushing {} records to backend", batch_size);

        match self.backend.insert_batch(batch).await {
            Ok(()) => {
                self.flush_count += 1;
                self.records_written += batch_size;
                trace!(
                    "flush #{} complete ({} records)",
                    self.flush_count, batch_size
                );
                Ok(())
            }
            Err(e) => {
                error!("failed to flush {} records: {}", batch_size, e);
                self.records_dropped.fetch_add(batch_size, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn run_cleanup(&mut self) {
        let Some(retention_days) = self.retention_days else {
            return;
        };

        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
        debug!("running retention cleanup (deleting data before {})", cutoff);

        match self.backend.cleanup_old_records(cutoff).await {
            Ok(0) => trace!("retention cleanup: nothing to delete"),
            Ok(deleted) => info!("retention cleanup deleted {} old records", deleted),
            Err(e) => error!("retention cleanup failed: {}", e),
        }
    }

    async fn handle_command(&mut self, cmd: StorageCommand) {
        match cmd {
            StorageCommand::Flush { respond_to } => {
                debug!("manual flush requested");
                self.drain_queue();
                let result = self.flush_batch().await.map_err(Into::into);
                let _ = respond_to.send(result);
            }

            StorageCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.get_stats().await);
            }

            StorageCommand::LatestMachineData {
                machine_id,
                limit,
                respond_to,
            } => {
                let result = self
                    .backend
                    .query_latest_machine_data(&machine_id, limit)
                    .await
                    .map_err(Into::into);
                let _ = respond_to.send(result);
            }

            StorageCommand::MachineDataRange { query, respond_to } => {
                let result = self
                    .backend
                    .query_machine_data(query)
                    .await
                    .map_err(Into::into);
                let _ = respond_to.send(result);
            }

            StorageCommand::LatestControls {
                machine_id,
                limit,
                respond_to,
            } => {
                let result = self
                    .backend
                    .query_latest_controls(&machine_id, limit)
                    .await
                    .map_err(Into::into);
                let _ = respond_to.send(result);
            }

            StorageCommand::LatestAlerts {
                machine_id,
                limit,
                respond_to,
            } => {
                let result = self
                    .backend
                    .query_latest_alerts(&machine_id, limit)
                    .await
                    .map_err(Into::into);
                let _ = respond_to.send(result);
            }

            StorageCommand::HealthCheck { respond_to } => {
                let result = self
                    .backend
                    .health_check()
                    .await
                    .map(|health| health.message)
                    .map_err(Into::into);
                let _ = respond_to.send(result);
            }

            StorageCommand::Shutdown => {}
        }
    }

    async fn get_stats(&self) -> StorageStats {
        let backend = self
            .backend
            .get_stats()
            .await
            .unwrap_or_else(|e| format!("unavailable: {e}"));

        StorageStats {
            records_written: self.records_written,
            buffer_size: self.batch_buffer.len(),
            flush_count: self.flush_count,
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            backend,
        }
    }
}

/// Handle for controlling the StorageActor
#[derive(Clone)]
pub struct StorageHandle {
    sender: mpsc::Sender<StorageCommand>,
    records: mpsc::Sender<AuditRecord>,
    records_dropped: Arc<AtomicU64>,
}

impl StorageHandle {
    pub fn spawn(backend: Box<dyn StorageBackend>, retention_days: Option<u32>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (record_tx, record_rx) = mpsc::channel(RECORD_QUEUE_CAPACITY);
        let records_dropped = Arc::new(AtomicU64::new(0));

        let actor = StorageActor::new(
            backend,
            record_rx,
            cmd_rx,
            retention_days,
            records_dropped.clone(),
        );

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            records: record_tx,
            records_dropped,
        }
    }

    /// Queue a record without waiting
    pub fn record(&self, record: AuditRecord) -> StorageResult<()> {
        self.records.try_send(record).map_err(|e| {
            self.records_dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    StorageError::Unavailable("record queue is full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    StorageError::Unavailable("storage actor stopped".to_string())
                }
            }
        })
    }

    /// Manually flush the write buffer
    pub async fn flush(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::Flush { respond_to: tx })
            .await?;

        rx.await??;
        Ok(())
    }

    pub async fn get_stats(&self) -> Option<StorageStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// The newest `limit` uplink records for a machine, oldest first
    pub async fn latest_machine_data(
        &self,
        machine_id: impl Into<String>,
        limit: usize,
    ) -> anyhow::Result<Vec<MachineDataRow>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::LatestMachineData {
                machine_id: machine_id.into(),
                limit,
                respond_to: tx,
            })
            .await?;

        rx.await?
    }

    /// Uplink records for a machine received between `start` and `end` (inclusive)
    pub async fn machine_data_between(
        &self,
        machine_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<MachineDataRow>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::MachineDataRange {
                query: QueryRange {
                    machine_id: machine_id.into(),
                    start,
                    end,
                    limit,
                },
                respond_to: tx,
            })
            .await?;

        rx.await?
    }

    pub async fn latest_controls(
        &self,
        machine_id: impl Into<String>,
        limit: usize,
    ) -> anyhow::Result<Vec<ControlRow>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::LatestControls {
                machine_id: machine_id.into(),
                limit,
                respond_to: tx,
            })
            .await?;

        rx.await?
    }

    pub async fn latest_alerts(
        &self,
        machine_id: impl Into<String>,
        limit: usize,
    ) -> anyhow::Result<Vec<AlertRow>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::LatestAlerts {
                machine_id: machine_id.into(),
                limit,
                respond_to: tx,
            })
            .await?;

        rx.await?
    }

    pub async fn health_check(&self) -> anyhow::Result<String> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::HealthCheck { respond_to: tx })
            .await?;

        rx.await?
    }

    /// Shutdown the storage actor
    pub async fn shutdown(&self) {
        let _ = self.sender.send(StorageCommand::Shutdown).await;
    }
}
