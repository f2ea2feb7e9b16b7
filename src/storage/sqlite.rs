//! SQLite storage backend implementation
//!
//! Embedded database in WAL mode with a small connection pool. The schema lives in
//! `migrations/` and is applied on startup. Each table has an index on
//! `(machine_id, timestamp)` which every query below uses.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, QueryRange, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertRow, ControlRow, MachineDataRow};
use crate::Parameter;
use crate::codec::AlertReason;

const TABLES: [&str; 3] = ["machine_data", "machine_control", "machine_alerts"];

pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (creating if missing) the database at `db_path` and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn machine_data_from_row(row: &SqliteRow) -> MachineDataRow {
        MachineDataRow {
            timestamp: Self::millis_to_timestamp(row.get("timestamp")),
            machine_id: row.get("machine_id"),
            machine_type: row.get("machine_type"),
            rpm: row.get("rpm"),
            coolant_temp: row.get("coolant_temp"),
            oil_pressure: row.get("oil_pressure"),
            battery_potential: row.get("battery_potential"),
            consumption: row.get("consumption"),
            rssi: row.get("rssi"),
            snr: row.get("snr"),
            channel_rssi: row.get("channel_rssi"),
        }
    }

    fn control_from_row(row: &SqliteRow) -> StorageResult<ControlRow> {
        let param: String = row.get("modify_param");
        let modify_param = param.parse::<Parameter>().map_err(StorageError::DecodeError)?;

        Ok(ControlRow {
            timestamp: Self::millis_to_timestamp(row.get("timestamp")),
            machine_id: row.get("machine_id"),
            modify_param,
            adjustment: row.get("adjustment"),
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<AlertRow> {
        let reason: String = row.get("reason");
        let reason = AlertReason::ALL
            .into_iter()
            .find(|known| known.as_str() == reason)
            .ok_or_else(|| StorageError::DecodeError(format!("unknown alert reason: {reason}")))?;

        Ok(AlertRow {
            timestamp: Self::millis_to_timestamp(row.get("timestamp")),
            machine_id: row.get("machine_id"),
            reason,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn insert_machine_data(&self, rows: Vec<MachineDataRow>) -> StorageResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO machine_data (
                    machine_id, machine_type, timestamp,
                    rpm, coolant_temp, oil_pressure, battery_potential, consumption,
                    rssi, snr, channel_rssi
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.machine_id)
            .bind(&row.machine_type)
            .bind(Self::timestamp_to_millis(&row.timestamp))
            .bind(row.rpm)
            .bind(row.coolant_temp)
            .bind(row.oil_pressure)
            .bind(row.battery_potential)
            .bind(row.consumption)
            .bind(row.rssi)
            .bind(row.snr)
            .bind(row.channel_rssi)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn insert_controls(&self, rows: Vec<ControlRow>) -> StorageResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO machine_control (machine_id, timestamp, modify_param, adjustment)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&row.machine_id)
            .bind(Self::timestamp_to_millis(&row.timestamp))
            .bind(row.modify_param.as_str())
            .bind(row.adjustment)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn insert_alerts(&self, rows: Vec<AlertRow>) -> StorageResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO machine_alerts (machine_id, timestamp, reason)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(&row.machine_id)
            .bind(Self::timestamp_to_millis(&row.timestamp))
            .bind(row.reason.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(machine_id = %query.machine_id))]
    async fn query_machine_data(&self, query: QueryRange) -> StorageResult<Vec<MachineDataRow>> {
        let limit = query
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let rows = sqlx::query(
            r#"
            SELECT * FROM machine_data
            WHERE machine_id = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(&query.machine_id)
        .bind(Self::timestamp_to_millis(&query.start))
        .bind(Self::timestamp_to_millis(&query.end))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let results: Vec<MachineDataRow> = rows.iter().map(Self::machine_data_from_row).collect();
        debug!("query returned {} rows", results.len());
        Ok(results)
    }

    async fn query_latest_machine_data(
        &self,
        machine_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<MachineDataRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM machine_data
            WHERE machine_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(machine_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<MachineDataRow> =
            rows.iter().map(Self::machine_data_from_row).collect();
        results.reverse();
        Ok(results)
    }

    async fn query_latest_controls(
        &self,
        machine_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<ControlRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM machine_control
            WHERE machine_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(machine_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut results = rows
            .iter()
            .map(Self::control_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        results.reverse();
        Ok(results)
    }

    async fn query_latest_alerts(
        &self,
        machine_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<AlertRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM machine_alerts
            WHERE machine_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(machine_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut results = rows
            .iter()
            .map(Self::alert_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        results.reverse();
        Ok(results)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_records(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let before_millis = Self::timestamp_to_millis(&before);
        let mut deleted = 0;

        for table in TABLES {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE timestamp < ?"))
                .bind(before_millis)
                .execute(&self.pool)
                .await?;
            deleted += result.rows_affected() as usize;
        }

        info!("deleted {} records older than {}", deleted, before);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite backend operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let mut counts = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
            counts.push(row.0);
        }

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(format!(
            "SQLite: {} rows ({} machine data, {} controls, {} alerts), {:.2} MB on disk",
            counts.iter().sum::<i64>(),
            counts[0],
            counts[1],
            counts[2],
            file_size as f64 / 1_000_000.0
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
