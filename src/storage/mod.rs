//! Audit persistence
//!
//! The gateway records every uplink, control command and critical alert it handles. Records
//! flow through the [`StorageActor`](crate::actors::storage::StorageActor) into a
//! [`StorageBackend`]:
//!
//! - **SQLite** (feature `storage-sqlite`, default): embedded database with migrations
//! - **In-memory**: recent records only, used when storage is disabled and in tests
//!
//! ## Usage
//!
//! ```no_run
//! use fleet_control::config::StorageConfig;
//! use fleet_control::storage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = storage::open(&StorageConfig::default()).await?;
//!     println!("{}", backend.get_stats().await?);
//!     Ok(())
//! }
//! ```

use anyhow::Context;
use tracing::info;

use crate::config::StorageConfig;

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{QueryRange, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{AlertRow, AuditRecord, ControlRow, MachineDataRow, RecordBatch};

/// Open the configured backend
pub async fn open(config: &StorageConfig) -> anyhow::Result<Box<dyn StorageBackend>> {
    match config {
        StorageConfig::None => {
            info!("storage disabled, keeping recent records in memory");
            Ok(Box::new(MemoryBackend::new()))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            let backend = sqlite::SqliteBackend::new(path)
                .await
                .with_context(|| format!("could not open database at {}", path.display()))?;
            Ok(Box::new(backend))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { path, .. } => {
            anyhow::bail!(
                "{} requires the storage-sqlite feature",
                path.display()
            )
        }
    }
}

impl StorageConfig {
    /// Retention applies to the SQLite backend only; the memory backend is bounded anyway
    pub fn retention_days(&self) -> Option<u32> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite { retention_days, .. } => Some(*retention_days),
        }
    }
}
