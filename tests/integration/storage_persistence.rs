//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Everything the gateway handles lands in SQLite
//! - Records survive a restart of the backend
//! - Retention cleanup removes old records from every table

use chrono::{Duration, Utc};
use fleet_control::Parameter;
use fleet_control::actors::StorageHandle;
use fleet_control::codec::AlertReason;
use fleet_control::storage::sqlite::SqliteBackend;
use fleet_control::storage::{AlertRow, AuditRecord, ControlRow, StorageBackend};
use fleet_control::transport::Publisher;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::*;

#[tokio::test]
async fn test_control_loop_is_audited_in_sqlite() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("fleet.db");

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    let p = Pipeline::spawn_with_backend(Box::new(backend)).await;

    for _ in 0..5 {
        p.bus
            .publish(&p.topics.uplink("M2"), imperial_uplink(230.0))
            .await
            .unwrap();
    }
    assert!(wait_until(|| !p.alert_frames("M2").is_empty()).await);
    assert!(wait_until(|| p.actuator_frames("M2").len() == 5).await);

    p.storage.flush().await.unwrap();
    let stats = p.storage.get_stats().await.unwrap();
    assert_eq!(stats.records_written, 11);
    assert_eq!(stats.records_dropped, 0);

    // Shutting down closes the pool; reopen the file as a fresh process would
    p.storage.shutdown().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let reopened = SqliteBackend::new(&db_path).await.unwrap();

    let readings = reopened.query_latest_machine_data("M2", 10).await.unwrap();
    assert_eq!(readings.len(), 5);
    assert_eq!(readings[0].machine_type, "B47Y");
    assert_eq!(readings[0].coolant_temp, 110.0);
    // channel_rssi falls back to rssi when the gateway doesn't report it
    assert_eq!(readings[0].channel_rssi, -85.0);

    let controls = reopened.query_latest_controls("M2", 10).await.unwrap();
    assert_eq!(controls.len(), 5);
    assert_eq!(controls[0].modify_param, Parameter::CoolantTemp);
    assert_eq!(controls[0].adjustment, -10.0);

    let alerts = reopened.query_latest_alerts("M2", 10).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].reason, AlertReason::HighControlAlarmRate);
}

#[tokio::test]
async fn test_retention_applies_to_every_table() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("fleet.db");
    let backend = SqliteBackend::new(&db_path).await.unwrap();

    let now = Utc::now();
    let old = now - Duration::days(40);

    backend
        .insert_controls(vec![
            ControlRow {
                timestamp: old,
                machine_id: "M1".to_string(),
                modify_param: Parameter::Rpm,
                adjustment: -6.0,
            },
            ControlRow {
                timestamp: now,
                machine_id: "M1".to_string(),
                modify_param: Parameter::Rpm,
                adjustment: 4.0,
            },
        ])
        .await
        .unwrap();
    backend
        .insert_alerts(vec![AlertRow {
            timestamp: old,
            machine_id: "M1".to_string(),
            reason: AlertReason::HighControlAlarmRate,
        }])
        .await
        .unwrap();

    let deleted = backend
        .cleanup_old_records(now - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    let controls = backend.query_latest_controls("M1", 10).await.unwrap();
    assert_eq!(controls.len(), 1);
    assert_eq!(controls[0].adjustment, 4.0);
    assert!(backend.query_latest_alerts("M1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_storage_actor_writes_through_to_sqlite() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("fleet.db");
    let backend = SqliteBackend::new(&db_path).await.unwrap();

    let storage = StorageHandle::spawn(Box::new(backend), Some(30));

    for i in 0..3 {
        storage
            .record(AuditRecord::Control(ControlRow {
                timestamp: Utc::now(),
                machine_id: "M1".to_string(),
                modify_param: Parameter::BatteryPotential,
                adjustment: f64::from(i) * 0.5,
            }))
            .unwrap();
    }
    storage.flush().await.unwrap();

    let controls = storage.latest_controls("M1", 2).await.unwrap();
    assert_eq!(controls.len(), 2);
    assert_eq!(controls[0].adjustment, 0.5);
    assert_eq!(controls[1].adjustment, 1.0);

    let health = storage.health_check().await.unwrap();
    assert!(!health.is_empty());

    storage.shutdown().await;
}
