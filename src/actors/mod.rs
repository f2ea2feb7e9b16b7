//! Actor-based control loop
//!
//! Each service is an actor running as an independent async task. Actors talk to each other
//! only through the broker topics; control requests from the owning binary (stats, state,
//! shutdown) go through each actor's mpsc command channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!   machines ──uplink──► ┌──────────────┐ ──machine_data──► ┌───────────────┐
//!                        │ GatewayActor │                   │ DecisionActor │
//!   machines ◄─downlink─ └──────┬───────┘ ◄─control_cmds─── └───────────────┘
//!                           ▲   │                │
//!                   UDP     │   │ records        │ control_cmds
//!                  alerts   │   ▼                ▼
//!                           │ ┌──────────────┐  ┌────────────┐
//!                           │ │ StorageActor │  │ AlarmActor │
//!                           │ └──────────────┘  └─────┬──────┘
//!                           └─────────────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **GatewayActor**: Standardizes uplinks, encodes commands and alerts into downlink frames
//! - **DecisionActor**: Issues corrective commands for out-of-range telemetry
//! - **AlarmActor**: Raises a critical alert when a machine needs too many corrections
//! - **StorageActor**: Batches audit records into the storage backend
//!
//! ## Communication Patterns
//!
//! 1. **Topics**: Inbound messages arrive on an mpsc receiver fed by the transport
//! 2. **Commands**: Each actor has an mpsc command channel for control messages
//! 3. **Request/Response**: oneshot channels for stats and state queries

pub mod alarm;
pub mod decision;
pub mod gateway;
pub mod messages;
pub mod storage;

pub use alarm::AlarmHandle;
pub use decision::DecisionHandle;
pub use gateway::GatewayHandle;
pub use storage::StorageHandle;
