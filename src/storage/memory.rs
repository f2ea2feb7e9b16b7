//! In-memory storage backend (no persistence)
//!
//! Keeps the most recent records per machine and table in ring buffers. Used when no database
//! is configured and throughout the tests. All data is lost on restart.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::backend::{HealthStatus, QueryRange, StorageBackend};
use super::error::StorageResult;
use super::schema::{AlertRow, ControlRow, MachineDataRow};

/// Maximum records to keep in memory per machine and table
const MAX_RECORDS_PER_MACHINE: usize = 1000;

#[derive(Default)]
struct Tables {
    machine_data: HashMap<String, VecDeque<MachineDataRow>>,
    controls: HashMap<String, VecDeque<ControlRow>>,
    alerts: HashMap<String, VecDeque<AlertRow>>,
}

impl Tables {
    fn total(&self) -> usize {
        count(&self.machine_data) + count(&self.controls) + count(&self.alerts)
    }
}

fn count<T>(table: &HashMap<String, VecDeque<T>>) -> usize {
    table.values().map(VecDeque::len).sum()
}

fn push<T>(table: &mut HashMap<String, VecDeque<T>>, machine_id: &str, row: T) {
    let rows = table.entry(machine_id.to_string()).or_default();
    rows.push_back(row);
    if rows.len() > MAX_RECORDS_PER_MACHINE {
        rows.pop_front();
    }
}

/// Newest `limit` rows, oldest first
fn latest<T: Clone>(table: &HashMap<String, VecDeque<T>>, machine_id: &str, limit: usize) -> Vec<T> {
    table
        .get(machine_id)
        .map(|rows| {
            let skip = rows.len().saturating_sub(limit);
            rows.iter().skip(skip).cloned().collect()
        })
        .unwrap_or_default()
}

fn retain_since<T>(
    table: &mut HashMap<String, VecDeque<T>>,
    before: DateTime<Utc>,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
) -> usize {
    let mut deleted = 0;
    for rows in table.values_mut() {
        let len = rows.len();
        rows.retain(|row| timestamp(row) >= before);
        deleted += len - rows.len();
    }
    table.retain(|_, rows| !rows.is_empty());
    deleted
}

#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_machine_data(&self, rows: Vec<MachineDataRow>) -> StorageResult<()> {
        trace!("in-memory backend: {} machine data rows", rows.len());
        let mut tables = self.tables.write().await;
        for row in rows {
            let machine_id = row.machine_id.clone();
            push(&mut tables.machine_data, &machine_id, row);
        }
        Ok(())
    }

    async fn insert_controls(&self, rows: Vec<ControlRow>) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        for row in rows {
            let machine_id = row.machine_id.clone();
            push(&mut tables.controls, &machine_id, row);
        }
        Ok(())
    }

    async fn insert_alerts(&self, rows: Vec<AlertRow>) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        for row in rows {
            let machine_id = row.machine_id.clone();
            push(&mut tables.alerts, &machine_id, row);
        }
        Ok(())
    }

    async fn query_machine_data(&self, query: QueryRange) -> StorageResult<Vec<MachineDataRow>> {
        debug!("querying in-memory storage for {}", query.machine_id);

        let tables = self.tables.read().await;
        let rows = tables
            .machine_data
            .get(&query.machine_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.timestamp >= query.start && row.timestamp <= query.end)
                    .take(query.limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(rows)
    }

    async fn query_latest_machine_data(
        &self,
        machine_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<MachineDataRow>> {
        Ok(latest(&self.tables.read().await.machine_data, machine_id, limit))
    }

    async fn query_latest_controls(
        &self,
        machine_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<ControlRow>> {
        Ok(latest(&self.tables.read().await.controls, machine_id, limit))
    }

    async fn query_latest_alerts(
        &self,
        machine_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<AlertRow>> {
        Ok(latest(&self.tables.read().await.alerts, machine_id, limit))
    }

    async fn cleanup_old_records(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut tables = self.tables.write().await;
        let deleted = retain_since(&mut tables.machine_data, before, |row| row.timestamp)
            + retain_since(&mut tables.controls, before, |row| row.timestamp)
            + retain_since(&mut tables.alerts, before, |row| row.timestamp);
        debug!("in-memory cleanup removed {deleted} records");
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let total = self.tables.read().await.total();
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_records".to_string(), total.to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let tables = self.tables.read().await;
        Ok(format!(
            "In-Memory: {} records across {} machines",
            tables.total(),
            tables.machine_data.len()
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
